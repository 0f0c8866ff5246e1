use crate::error::ProtocolError;

/// Headers of one multipart part that the parser acts on.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct PartHeaders {
    pub content_length: Option<usize>,
    pub content_type: Option<String>,
}

/// Parse the header block that follows a delimiter.
///
/// `buf` starts right after the delimiter bytes: the remainder of the
/// delimiter line, the header lines, then a blank line. Returns `None` while
/// the block is incomplete, otherwise the headers and the number of bytes the
/// block occupies.
pub(crate) fn parse_header_block(buf: &[u8]) -> Result<Option<(PartHeaders, usize)>, ProtocolError> {
    if buf.starts_with(b"--") {
        return Err(ProtocolError::EndOfStream);
    }

    let Some(first) = buf.iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };
    if !buf[..first].trim_ascii().is_empty() {
        return Err(ProtocolError::BoundaryMismatch);
    }

    let mut headers = PartHeaders::default();
    let mut pos = first + 1;

    loop {
        let Some(len) = buf[pos..].iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let line = buf[pos..pos + len].trim_ascii_end();
        pos += len + 1;

        if line.is_empty() {
            return Ok(Some((headers, pos)));
        }
        parse_line(line, &mut headers)?;
    }
}

fn parse_line(line: &[u8], headers: &mut PartHeaders) -> Result<(), ProtocolError> {
    let text = String::from_utf8_lossy(line);
    let (name, value) = text
        .split_once(':')
        .ok_or_else(|| ProtocolError::MalformedHeader(text.to_string()))?;
    let value = value.trim();

    match name.trim() {
        n if n.eq_ignore_ascii_case("content-length") => {
            let len = value
                .parse()
                .map_err(|_| ProtocolError::InvalidContentLength(value.to_owned()))?;
            headers.content_length = Some(len);
        }
        n if n.eq_ignore_ascii_case("content-type") => {
            headers.content_type = Some(value.to_owned());
        }
        _ => {}
    }
    Ok(())
}

/// `image/jpeg`, ignoring parameters and case.
pub(crate) fn is_jpeg(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|media| media.trim().eq_ignore_ascii_case("image/jpeg"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_block() {
        let block = b"\r\nContent-Type: image/jpeg\r\ncontent-LENGTH: 42\r\nX-Other: 1\r\n\r\nJPEG";
        let (headers, used) = parse_header_block(block).unwrap().unwrap();
        assert_eq!(headers.content_length, Some(42));
        assert_eq!(headers.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(&block[used..], b"JPEG");
    }

    #[test]
    fn no_headers_and_bare_newlines() {
        let (headers, used) = parse_header_block(b"\n\nrest").unwrap().unwrap();
        assert_eq!(headers, PartHeaders::default());
        assert_eq!(used, 2);
    }

    #[test]
    fn incomplete_block() {
        assert_eq!(parse_header_block(b"").unwrap(), None);
        assert_eq!(parse_header_block(b"\r\nContent-Le").unwrap(), None);
        assert_eq!(parse_header_block(b"\r\nContent-Length: 4\r\n").unwrap(), None);
    }

    #[test]
    fn framing_errors() {
        assert_eq!(
            parse_header_block(b"--\r\n").unwrap_err(),
            ProtocolError::EndOfStream
        );
        assert_eq!(
            parse_header_block(b"extra\r\n\r\n").unwrap_err(),
            ProtocolError::BoundaryMismatch
        );
        assert!(matches!(
            parse_header_block(b"\r\nno colon here\r\n\r\n"),
            Err(ProtocolError::MalformedHeader(_))
        ));
        assert!(matches!(
            parse_header_block(b"\r\nContent-Length: lots\r\n\r\n"),
            Err(ProtocolError::InvalidContentLength(_))
        ));
    }

    #[test]
    fn jpeg_media_type() {
        assert!(is_jpeg("image/jpeg"));
        assert!(is_jpeg(" Image/JPEG; q=1"));
        assert!(!is_jpeg("image/png"));
    }
}
