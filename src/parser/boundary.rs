use crate::error::ProtocolError;

/// Multipart boundary of one connection, taken from the response content-type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary {
    token: String,
    delimiter: Vec<u8>,
    dashed: bool,
}

impl Boundary {
    /// Build from the raw `boundary=` value. Quotes, surrounding whitespace and
    /// leading dashes are tolerated.
    pub fn new(token: &str) -> Result<Self, ProtocolError> {
        let token = token.trim().trim_matches('"').trim();
        let core = token.trim_start_matches('-');
        if core.is_empty() {
            return Err(ProtocolError::MissingBoundary);
        }

        let mut delimiter = Vec::with_capacity(core.len() + 2);
        delimiter.extend_from_slice(b"--");
        delimiter.extend_from_slice(core.as_bytes());

        Ok(Self {
            token: token.to_owned(),
            delimiter,
            dashed: token.starts_with("--"),
        })
    }

    /// Extract the boundary parameter from a `Content-Type` header value.
    pub fn from_content_type(content_type: &str) -> Result<Self, ProtocolError> {
        content_type
            .split(';')
            .skip(1)
            .filter_map(|param| param.split_once('='))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
            .ok_or(ProtocolError::MissingBoundary)
            .and_then(|(_, value)| Self::new(value))
    }

    /// The token as declared by the server.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The bytes that open every part on the wire.
    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    /// Declared with leading dashes; such servers may put two extra dashes on
    /// the wire in front of the delimiter.
    pub(crate) fn dashed(&self) -> bool {
        self.dashed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_token() {
        let b = Boundary::from_content_type("multipart/x-mixed-replace;boundary=frame").unwrap();
        assert_eq!(b.token(), "frame");
        assert_eq!(b.delimiter(), b"--frame");
        assert!(!b.dashed());
    }

    #[test]
    fn quoted_spaced_and_case_insensitive() {
        let b = Boundary::from_content_type(
            "multipart/x-mixed-replace; charset=utf-8; Boundary=\"myboundary\" \r\n",
        )
        .unwrap();
        assert_eq!(b.delimiter(), b"--myboundary");
    }

    #[test]
    fn leading_dashes_are_not_doubled() {
        let b = Boundary::from_content_type("multipart/x-mixed-replace;boundary=--ipcam").unwrap();
        assert_eq!(b.token(), "--ipcam");
        assert_eq!(b.delimiter(), b"--ipcam");
        assert!(b.dashed());
    }

    #[test]
    fn missing_or_empty_boundary() {
        for ct in [
            "multipart/x-mixed-replace",
            "image/jpeg",
            "multipart/x-mixed-replace;boundary=",
            "multipart/x-mixed-replace;boundary=\"--\"",
        ] {
            assert_eq!(
                Boundary::from_content_type(ct).unwrap_err(),
                ProtocolError::MissingBoundary,
                "{ct}"
            );
        }
    }
}
