#![forbid(unsafe_code)]

// ***************************************************************************
//                                Constants
// ***************************************************************************
// The body is delimited by the connection closing, so no Content-Length.
pub const CANNED_RESPONSE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nSuccessfully connected!";

// Blank line ending an HTTP header section.
pub const REQUEST_TERMINATOR: &[u8] = b"\r\n\r\n";

// ---------------------------------------------------------------------------
// canned_response:
// ---------------------------------------------------------------------------
/** The bytes written to every client, whatever it sent. */
pub fn canned_response() -> &'static [u8] {
    CANNED_RESPONSE.as_bytes()
}

// ---------------------------------------------------------------------------
// has_terminator:
// ---------------------------------------------------------------------------
/** Check whether buf contains the request terminator.  Only the bytes from
 * `from` onward (minus the terminator's length, since the sequence can
 * straddle two reads) are searched so repeated calls on a growing buffer
 * don't rescan it.
 */
pub fn has_terminator(buf: &[u8], from: usize) -> bool {
    let start = from.saturating_sub(REQUEST_TERMINATOR.len() - 1);
    buf.get(start..)
        .map(|tail| tail.windows(REQUEST_TERMINATOR.len()).any(|w| w == REQUEST_TERMINATOR))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// detect_status_code:
// ---------------------------------------------------------------------------
/** Return the status code of the first "HTTP/d.d<whitespace>ddd" sequence in
 * the response text, or the empty string when there is none.
 */
pub fn detect_status_code(response: &str) -> String {
    let bytes = response.as_bytes();
    let mut search_from = 0;
    while let Some(pos) = response[search_from..].find("HTTP/") {
        let start = search_from + pos;
        if let Some(code) = status_after_version(&bytes[start + "HTTP/".len()..]) {
            return code;
        }
        search_from = start + 1;
    }
    String::new()
}

// ---------------------------------------------------------------------------
// status_after_version:
// ---------------------------------------------------------------------------
// Match "d.d", one or more whitespace bytes and three digits.
fn status_after_version(rest: &[u8]) -> Option<String> {
    match rest {
        [major, b'.', minor, tail @ ..] if major.is_ascii_digit() && minor.is_ascii_digit() => {
            let ws = tail.iter().take_while(|b| b.is_ascii_whitespace()).count();
            if ws == 0 {
                return None;
            }
            let code = tail.get(ws..ws + 3)?;
            if code.iter().all(u8::is_ascii_digit) {
                Some(String::from_utf8_lossy(code).into_owned())
            } else {
                None
            }
        }
        _ => None,
    }
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canned_response_bytes() {
        assert_eq!(
            canned_response(),
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nSuccessfully connected!"
        );
        assert!(CANNED_RESPONSE.ends_with("\r\n\r\nSuccessfully connected!"));
        assert!(!CANNED_RESPONSE.contains("Content-Length"));
    }

    #[test]
    fn status_of_canned_response() {
        assert_eq!(detect_status_code(CANNED_RESPONSE), "200");
    }

    #[test]
    fn status_detection_edge_cases() {
        assert_eq!(detect_status_code("HTTP/1.0  404 Not Found"), "404");
        assert_eq!(detect_status_code("HTTP/1.1\t500 Oops"), "500");
        assert_eq!(detect_status_code("junk HTTP/2 200 HTTP/1.1 301 Moved"), "301");
        assert_eq!(detect_status_code("HTTP/1.1 20"), "");
        assert_eq!(detect_status_code("HTTP/1.1200 OK"), "");
        assert_eq!(detect_status_code("HTTP/x.1 200 OK"), "");
        assert_eq!(detect_status_code(""), "");
    }

    #[test]
    fn terminator_detection() {
        assert!(has_terminator(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", 0));
        assert!(!has_terminator(b"GET / HTTP/1.1\r\nHost: x\r\n", 0));
        assert!(!has_terminator(b"", 0));
    }

    #[test]
    fn terminator_split_across_reads() {
        let mut buf = b"GET / HTTP/1.1\r\nHost: x\r\n\r".to_vec();
        assert!(!has_terminator(&buf, 0));
        let before = buf.len();
        buf.extend_from_slice(b"\n");
        assert!(has_terminator(&buf, before));
    }
}
