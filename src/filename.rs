use tracing::debug;

/// Fields decoded from a canonical transcript filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFilename {
    pub ticker: String,
    pub quarter: String,
    pub year: String,
    pub transcript_type: String,
    pub event_id: String,
    pub version_id: String,
}

/// Build the canonical transcript filename:
/// `{ticker}_{quarter}_{year}_{type}_{eventId}_{versionId}.xml`.
///
/// Fields must not themselves contain `_`; upstream identifiers honor this
/// and it is not validated here.
pub fn encode(
    ticker: &str,
    quarter: &str,
    year: &str,
    transcript_type: &str,
    event_id: &str,
    version_id: &str,
) -> String {
    format!("{ticker}_{quarter}_{year}_{transcript_type}_{event_id}_{version_id}.xml")
}

/// Decode a canonical filename, or `None` if it does not conform.
///
/// Non-conforming names are excluded from the inventory. They are never
/// deleted or reconciled; the scanner surfaces them for manual cleanup.
pub fn decode(filename: &str) -> Option<DecodedFilename> {
    let Some(basename) = filename.strip_suffix(".xml") else {
        debug!("Filename {filename} is not an XML file");
        return None;
    };

    let parts: Vec<&str> = basename.split('_').collect();
    if parts.len() != 6 {
        debug!(
            "Filename {filename} has {} parts, expected 6 (ticker_quarter_year_type_eventid_versionid)",
            parts.len()
        );
        return None;
    }

    if parts[0].is_empty() || parts[1].is_empty() || parts[2].is_empty() {
        debug!("Filename {filename} has empty required fields");
        return None;
    }

    Some(DecodedFilename {
        ticker: parts[0].to_string(),
        quarter: parts[1].to_string(),
        year: parts[2].to_string(),
        transcript_type: parts[3].to_string(),
        event_id: parts[4].to_string(),
        version_id: parts[5].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encode_decode_round_trip() {
        let filename = encode("RY-CA", "Q1", "2024", "Corrected", "12345", "2");
        assert_eq!(filename, "RY-CA_Q1_2024_Corrected_12345_2.xml");

        let decoded = decode(&filename).unwrap();
        assert_eq!(
            decoded,
            DecodedFilename {
                ticker: "RY-CA".to_string(),
                quarter: "Q1".to_string(),
                year: "2024".to_string(),
                transcript_type: "Corrected".to_string(),
                event_id: "12345".to_string(),
                version_id: "2".to_string(),
            }
        );
    }

    #[test]
    fn decode_rejects_wrong_part_count() {
        assert_eq!(decode("not_enough_parts.xml"), None);
        assert_eq!(decode("a_b_c_d_e_f_g.xml"), None);
    }

    #[test]
    fn decode_rejects_wrong_extension() {
        assert_eq!(decode("a_b_c_d_e_f.csv"), None);
        assert_eq!(decode("a_b_c_d_e_f"), None);
    }

    #[test]
    fn decode_rejects_empty_required_fields() {
        assert_eq!(decode("_Q1_2024_Final_1_1.xml"), None);
        assert_eq!(decode("RY-CA__2024_Final_1_1.xml"), None);
        assert_eq!(decode("RY-CA_Q1__Final_1_1.xml"), None);
    }

    #[test]
    fn decode_allows_empty_trailing_ids() {
        // Only ticker/quarter/year are required to be non-empty.
        let decoded = decode("RY-CA_Q1_2024_Final_1_.xml").unwrap();
        assert_eq!(decoded.version_id, "");
    }
}
