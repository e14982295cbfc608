use quick_xml::events::Event;
use regex::Regex;
use std::sync::OnceLock;

/// Loose period pattern: matches anywhere in the title, case-insensitive.
fn period_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)Q([1-4])\s+(20\d{2})").expect("period pattern compiles"))
}

/// Strict full-title pattern for earnings calls.
fn earnings_call_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^Q[1-4]\s+20\d{2}\s+Earnings\s+Call$").expect("title pattern compiles")
    })
}

/// Extract `(quarter, year, title)` from a transcript document.
///
/// The quarter and year come from the loose period pattern when it matches
/// somewhere in the `<meta><title>` text, otherwise both are "Unknown". Any
/// parse failure is per-document and recoverable: the returned title carries
/// the failure message and the caller decides what to do with it.
pub fn extract_title_and_period(xml: &[u8]) -> (String, String, String) {
    let title = match read_meta_title(xml) {
        Ok(Some(title)) => title,
        Ok(None) => {
            return (
                "Unknown".to_string(),
                "Unknown".to_string(),
                "No title found".to_string(),
            )
        }
        Err(e) => {
            return (
                "Unknown".to_string(),
                "Unknown".to_string(),
                format!("Error parsing: {e}"),
            )
        }
    };

    if let Some(caps) = period_pattern().captures(&title) {
        let quarter = format!("Q{}", &caps[1]);
        let year = caps[2].to_string();
        return (quarter, year, title);
    }

    ("Unknown".to_string(), "Unknown".to_string(), title)
}

/// Strict earnings-call check: exactly `Qx 20xx Earnings Call`, nothing more.
///
/// This is deliberately narrow. The source's query cannot exclude conference
/// presentations, M&A calls and the like, so the title is the last gate.
pub fn is_valid_earnings_call_title(title: &str) -> bool {
    earnings_call_pattern().is_match(title)
}

/// Walk the document until the first non-empty `<title>` inside `<meta>`.
fn read_meta_title(xml: &[u8]) -> Result<Option<String>, quick_xml::Error> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_meta = false;
    let mut in_title = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"meta" => in_meta = true,
                b"title" if in_meta => in_title = true,
                _ => {}
            },
            Event::Text(t) if in_title => {
                let text = t.unescape().unwrap_or_default();
                let title = text.trim();
                if !title.is_empty() {
                    return Ok(Some(title.to_string()));
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                // The meta block closed without a usable title.
                b"meta" if in_meta => return Ok(None),
                b"title" => in_title = false,
                _ => {}
            },
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn transcript_xml(title: &str) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<transcript xmlns="http://example.com/transcript/v1">
  <meta>
    <title>{title}</title>
    <date>2024-02-28</date>
  </meta>
  <body><section>Operator remarks.</section></body>
</transcript>"#
        )
        .into_bytes()
    }

    #[test]
    fn extracts_period_from_valid_title() {
        let (quarter, year, title) =
            extract_title_and_period(&transcript_xml("Q1 2024 Earnings Call"));
        assert_eq!(quarter, "Q1");
        assert_eq!(year, "2024");
        assert_eq!(title, "Q1 2024 Earnings Call");
    }

    #[test]
    fn extracts_period_from_anywhere_in_title() {
        let (quarter, year, title) =
            extract_title_and_period(&transcript_xml("Royal Bank Q3 2023 Analyst Day"));
        assert_eq!(quarter, "Q3");
        assert_eq!(year, "2023");
        assert_eq!(title, "Royal Bank Q3 2023 Analyst Day");
    }

    #[test]
    fn unknown_period_when_pattern_absent() {
        let (quarter, year, title) =
            extract_title_and_period(&transcript_xml("Annual Shareholder Meeting"));
        assert_eq!(quarter, "Unknown");
        assert_eq!(year, "Unknown");
        assert_eq!(title, "Annual Shareholder Meeting");
    }

    #[test]
    fn missing_title_reports_unknown() {
        let xml = b"<transcript><meta><date>2024-02-28</date></meta></transcript>";
        let (quarter, year, title) = extract_title_and_period(xml);
        assert_eq!(quarter, "Unknown");
        assert_eq!(year, "Unknown");
        assert_eq!(title, "No title found");
    }

    #[test]
    fn malformed_xml_is_recoverable() {
        let (quarter, year, title) = extract_title_and_period(b"<transcript><meta><title>Q1");
        assert_eq!(quarter, "Unknown");
        assert_eq!(year, "Unknown");
        // Either the reader errors or the document simply ends without a title.
        assert!(title.starts_with("Error parsing:") || title == "No title found");
    }

    #[test]
    fn title_validator_is_strict() {
        assert!(is_valid_earnings_call_title("Q1 2024 Earnings Call"));
        assert!(is_valid_earnings_call_title("q1 2024 earnings call"));
        assert!(is_valid_earnings_call_title("Q4 2023  Earnings  Call"));
        assert!(!is_valid_earnings_call_title("Q1 2024 Earnings Call Transcript"));
        assert!(!is_valid_earnings_call_title("Full Year 2024 Earnings Call"));
        assert!(!is_valid_earnings_call_title("Q5 2024 Earnings Call"));
        assert!(!is_valid_earnings_call_title("Earnings Call Q1 2024"));
        assert!(!is_valid_earnings_call_title(""));
    }
}
