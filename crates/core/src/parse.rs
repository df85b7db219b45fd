//! Line parsing and classification for raw modem output
//!
//! The modem talks in CRLF-delimited ASCII lines. Everything here operates on
//! the engine's accumulation buffer, which may end mid-line at any time, so
//! every terminal predicate is gated on a trailing CRLF. Matching `OK` on a
//! partially received line is the classic bug this module exists to prevent.

/// Split a raw buffer into logical lines, discarding empty fragments.
///
/// Splits on any CR/LF sequence; bytes after the last terminator form a
/// trailing (possibly incomplete) fragment.
pub fn split_lines(buffer: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(buffer)
        .split(['\r', '\n'])
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Whether the raw buffer ends with a complete CRLF terminator.
pub fn ends_with_crlf(buffer: &[u8]) -> bool {
    buffer.ends_with(b"\r\n")
}

/// Terminal success: the last fragment is exactly `OK` and the buffer is
/// CRLF-terminated.
pub fn is_ok(buffer: &[u8]) -> bool {
    if !ends_with_crlf(buffer) {
        return false;
    }
    split_lines(buffer).last().map(String::as_str) == Some("OK")
}

/// Whether the modem is prompting for a PDU body (`>` after `AT+CMGS=`).
pub fn is_waiting_for_input(lines: &[String]) -> bool {
    lines.last().is_some_and(|l| l.starts_with('>'))
}

/// A terminal error reported by the modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    /// Bare `ERROR` line; `raw` carries the joined fragments for diagnostics.
    Generic { raw: String },
    /// `+CME ERROR: <text>` / `+CMS ERROR: <text>` style report.
    Reported { message: String },
}

/// Classify a terminal error in the buffer, if any.
///
/// Only considered once the buffer is CRLF-terminated; a partial `ERRO` must
/// never fail a job early.
pub fn response_error(buffer: &[u8]) -> Option<ResponseError> {
    if !ends_with_crlf(buffer) {
        return None;
    }
    let lines = split_lines(buffer);
    let last = lines.last()?;
    if last == "ERROR" {
        return Some(ResponseError::Generic {
            raw: lines.join("\n"),
        });
    }
    if last.starts_with("+C") {
        if let Some((_, message)) = last.split_once(" ERROR: ") {
            return Some(ResponseError::Reported {
                message: message.to_owned(),
            });
        }
    }
    None
}

/// First fragment starting with `prefix`, if any.
pub fn first_with_prefix<'a>(lines: &'a [String], prefix: &str) -> Option<&'a str> {
    lines
        .iter()
        .find(|l| l.starts_with(prefix))
        .map(String::as_str)
}

/// Network-ready banner: the modem prints both `Call Ready` and `SMS Ready`
/// once it has registered after a cold boot.
pub fn is_network_ready_banner(lines: &[String]) -> bool {
    lines.iter().any(|l| l == "Call Ready") && lines.iter().any(|l| l == "SMS Ready")
}

/// Whether any fragment announces a new-SMS indication (`+CMTI:`).
pub fn has_sms_indication(lines: &[String]) -> bool {
    first_with_prefix(lines, "+CMTI: ").is_some()
}

/// Whether any fragment announces an unsolicited registration change.
pub fn has_registration_change(lines: &[String]) -> bool {
    first_with_prefix(lines, "+CREG: ").is_some()
}

/// Whether any fragment opens a delivery report (`+CDS:`).
pub fn has_delivery_header(lines: &[String]) -> bool {
    first_with_prefix(lines, "+CDS: ").is_some()
}

/// Extract a complete delivery report: the `+CDS: <n>` header followed by its
/// PDU payload line.
///
/// The payload line arrives separately from the header, so the report is held
/// until the line after the header exists and the buffer is CRLF-terminated.
pub fn delivery_report(lines: &[String], terminated: bool) -> Option<(u8, String)> {
    if !terminated {
        return None;
    }
    let idx = lines.iter().position(|l| l.starts_with("+CDS: "))?;
    let short_id = lines[idx].strip_prefix("+CDS: ")?.trim().parse().ok()?;
    let data = lines.get(idx + 1)?.clone();
    Some((short_id, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_discards_empty_fragments() {
        let lines = split_lines(b"\r\nfoo\r\n\r\nOK\r\n");
        assert_eq!(lines, vec!["foo".to_string(), "OK".to_string()]);
    }

    #[test]
    fn test_well_formed_reply_round_trip() {
        let buffer = b"+CPIN: READY\r\nOK\r\n";
        assert_eq!(split_lines(buffer), vec!["+CPIN: READY", "OK"]);
        assert!(is_ok(buffer));
    }

    #[test]
    fn test_is_ok_requires_trailing_crlf() {
        assert!(!is_ok(b"\r\nOK"));
        assert!(!is_ok(b"\r\nOK\r"));
        assert!(is_ok(b"\r\nOK\r\n"));
    }

    #[test]
    fn test_is_ok_requires_ok_as_last_fragment() {
        assert!(!is_ok(b"\r\nOK\r\n+CREG: 0,1\r\n"));
        assert!(!is_ok(b"\r\nNOT OK\r\n"));
    }

    #[test]
    fn test_prompt_detection() {
        let lines = split_lines(b"\r\n> ");
        assert!(is_waiting_for_input(&lines));
        assert!(!is_waiting_for_input(&split_lines(b"\r\nOK\r\n")));
    }

    #[test]
    fn test_error_requires_trailing_crlf() {
        assert_eq!(response_error(b"\r\n+CME ERROR: SIM not inserted"), None);
        assert_eq!(
            response_error(b"\r\n+CME ERROR: SIM not inserted\r\n"),
            Some(ResponseError::Reported {
                message: "SIM not inserted".to_owned()
            })
        );
    }

    #[test]
    fn test_generic_error_carries_raw_lines() {
        assert_eq!(
            response_error(b"AT+FOO\r\nERROR\r\n"),
            Some(ResponseError::Generic {
                raw: "AT+FOO\nERROR".to_owned()
            })
        );
    }

    #[test]
    fn test_partial_error_is_not_an_error() {
        assert_eq!(response_error(b"\r\nERRO"), None);
        assert_eq!(response_error(b"\r\nOK\r\n"), None);
    }

    #[test]
    fn test_network_ready_banner_needs_both_lines() {
        assert!(is_network_ready_banner(&split_lines(
            b"\r\nCall Ready\r\n\r\nSMS Ready\r\n"
        )));
        assert!(!is_network_ready_banner(&split_lines(b"\r\nCall Ready\r\n")));
    }

    #[test]
    fn test_delivery_report_held_until_payload_terminated() {
        let header_only = split_lines(b"\r\n+CDS: 24\r\n");
        assert_eq!(delivery_report(&header_only, true), None);

        let partial = split_lines(b"\r\n+CDS: 24\r\n0791");
        assert_eq!(delivery_report(&partial, false), None);

        let complete = split_lines(b"\r\n+CDS: 24\r\n079100\r\n");
        assert_eq!(
            delivery_report(&complete, true),
            Some((24, "079100".to_owned()))
        );
    }

    #[test]
    fn test_unsolicited_predicates() {
        let lines = split_lines(b"\r\n+CREG: 0,1\r\n\r\n+CMTI: \"SM\",3\r\n");
        assert!(has_registration_change(&lines));
        assert!(has_sms_indication(&lines));
        assert!(!has_delivery_header(&lines));
    }
}
