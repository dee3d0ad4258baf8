//! Extracts the hostname from the HTTP/1.x `Host:` header via line-oriented
//! request-line/header scanning (split on `\r\n`, then on the first `:`).
//! Only the request line and headers are inspected, never the body, so a
//! full request need not have arrived before a verdict is reached.

use super::ParseOutcome;

pub fn parse_host_header(bytes: &[u8]) -> ParseOutcome {
    let Some(headers_end) = find_subsequence(bytes, b"\r\n\r\n") else {
        if bytes.len() > super::MAX_PEEK {
            return ParseOutcome::Malformed;
        }
        return ParseOutcome::Incomplete;
    };

    let head = &bytes[..headers_end];
    let Ok(head_str) = std::str::from_utf8(head) else {
        return ParseOutcome::Malformed;
    };

    let mut lines = head_str.split("\r\n");
    let Some(request_line) = lines.next() else {
        return ParseOutcome::Malformed;
    };
    if request_line.split_whitespace().count() != 3 {
        return ParseOutcome::Malformed;
    }

    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("host") {
                let host = value.trim();
                let hostname = host.split(':').next().unwrap_or(host);
                if hostname.is_empty() {
                    return ParseOutcome::NoHostname;
                }
                return ParseOutcome::Hostname(hostname.to_string());
            }
        }
    }

    ParseOutcome::NoHostname
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
