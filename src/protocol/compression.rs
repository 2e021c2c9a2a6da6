//! Server frame decompression.
//!
//! Every server frame leads with a one-byte compression scheme:
//!
//! | Scheme | Meaning |
//! |--------|---------|
//! | 0      | identity |
//! | 1      | brotli (reserved, not supported) |
//! | 2      | gzip |
//!
//! The returned buffer is always owned by the caller; it never aliases the
//! socket's frame buffer.

use std::io::Read;

use flate2::read::GzDecoder;

use super::ProtocolError;

const SCHEME_NONE: u8 = 0;
const SCHEME_BROTLI: u8 = 1;
const SCHEME_GZIP: u8 = 2;

/// Strip the compression prefix and inflate the payload.
pub fn decompress_server_message(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let (&scheme, body) = payload.split_first().ok_or(ProtocolError::EmptyFrame)?;

    match scheme {
        SCHEME_NONE => Ok(body.to_vec()),
        SCHEME_BROTLI => Err(ProtocolError::BrotliUnsupported),
        SCHEME_GZIP => {
            let mut decoded = Vec::new();
            GzDecoder::new(body)
                .read_to_end(&mut decoded)
                .map_err(ProtocolError::Gzip)?;
            Ok(decoded)
        }
        other => Err(ProtocolError::UnknownCompressionScheme(other)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_identity_frame_is_copied() {
        let mut frame = vec![0u8];
        frame.extend_from_slice(b"hi");

        let decoded = decompress_server_message(&frame).unwrap();
        assert_eq!(decoded, b"hi");

        // Mutating the input afterwards must not reach the returned buffer.
        frame[1] = b'X';
        assert_eq!(decoded, b"hi");
    }

    #[test]
    fn test_gzip_frame_inflates() {
        let mut frame = vec![2u8];
        frame.extend_from_slice(&gzip(b"transaction payload"));

        let decoded = decompress_server_message(&frame).unwrap();
        assert_eq!(decoded, b"transaction payload");
    }

    #[test]
    fn test_brotli_frame_is_rejected() {
        let err = decompress_server_message(&[1, 0xde, 0xad]).unwrap_err();
        assert!(err.to_string().contains("brotli"));
    }

    #[test]
    fn test_unknown_scheme_is_rejected() {
        let err = decompress_server_message(&[9, 1, 2, 3]).unwrap_err();
        assert!(err.to_string().contains("unknown compression scheme"));
    }

    #[test]
    fn test_empty_frame_is_rejected() {
        let err = decompress_server_message(&[]).unwrap_err();
        assert!(matches!(err, ProtocolError::EmptyFrame));
    }

    #[test]
    fn test_truncated_gzip_fails() {
        let mut frame = vec![2u8];
        let compressed = gzip(b"some longer payload that will not survive truncation");
        frame.extend_from_slice(&compressed[..compressed.len() / 2]);

        let err = decompress_server_message(&frame).unwrap_err();
        assert!(matches!(err, ProtocolError::Gzip(_)));
    }

    #[test]
    fn test_scheme_only_frame_decodes_empty() {
        let decoded = decompress_server_message(&[0]).unwrap();
        assert!(decoded.is_empty());
    }
}
