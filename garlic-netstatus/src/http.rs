//! Minimal HTTP/1.0 client for directory requests.
//!
//! Directory servers speak a restricted form of HTTP over their dir
//! ports, and the same request format is tunneled over BEGIN_DIR
//! streams.  Responses to `.z` paths are zlib-compressed.

use crate::{Error, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

/// The most headers we accept in a directory response.
const MAX_HEADERS: usize = 32;

/// The largest decompressed directory object we accept.
const MAX_OBJECT_LEN: usize = 64 * 1024 * 1024;

/// Format a GET request for a directory resource.
pub fn format_request(path: &str) -> String {
    format!(
        "GET {} HTTP/1.0\r\nAccept-Encoding: deflate, identity\r\n\r\n",
        path
    )
}

/// Fetch `path` from the directory server at `addr` over plain HTTP.
///
/// Decompresses the body when the response (or the `.z` path) calls
/// for it.
pub async fn dir_get(addr: std::net::SocketAddr, path: &str) -> Result<Vec<u8>> {
    trace!("directory GET {} from {}", path, addr);
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(format_request(path).as_bytes()).await?;
    stream.flush().await?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;
    decode_response(&raw, path.ends_with(".z"))
}

/// Parse a raw HTTP response and return its (possibly decompressed)
/// body.
///
/// `compressed_hint` should be set when the request was for a `.z`
/// resource, since some directories omit the Content-Encoding header.
pub fn decode_response(raw: &[u8], compressed_hint: bool) -> Result<Vec<u8>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    let parsed = response
        .parse(raw)
        .map_err(|_| Error::DirectoryUnavailable("unparseable http response".into()))?;
    let body_start = match parsed {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => {
            return Err(Error::DirectoryUnavailable("truncated http response".into()))
        }
    };
    match response.code {
        Some(200) => (),
        Some(code) => return Err(Error::BadResponse(code)),
        None => return Err(Error::DirectoryUnavailable("http response without status".into())),
    }

    let deflated = compressed_hint
        || response.headers.iter().any(|h| {
            h.name.eq_ignore_ascii_case("Content-Encoding")
                && matches!(
                    std::str::from_utf8(h.value),
                    Ok("deflate") | Ok("x-zlib") | Ok("zlib")
                )
        });

    let body = &raw[body_start..];
    if deflated {
        miniz_oxide::inflate::decompress_to_vec_zlib_with_limit(body, MAX_OBJECT_LEN)
            .map_err(|_| Error::Compression)
    } else {
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn zlib(data: &[u8]) -> Vec<u8> {
        miniz_oxide::deflate::compress_to_vec_zlib(data, 6)
    }

    #[test]
    fn plain_response() {
        let raw = b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\nhello world";
        assert_eq!(decode_response(raw, false).unwrap(), b"hello world");
    }

    #[test]
    fn deflated_response() {
        let mut raw = b"HTTP/1.0 200 OK\r\nContent-Encoding: deflate\r\n\r\n".to_vec();
        raw.extend_from_slice(&zlib(b"network-status-version 3"));
        assert_eq!(
            decode_response(&raw, false).unwrap(),
            b"network-status-version 3"
        );
    }

    #[test]
    fn z_path_hint() {
        // No Content-Encoding header, but the caller knows it asked
        // for a .z resource.
        let mut raw = b"HTTP/1.0 200 OK\r\n\r\n".to_vec();
        raw.extend_from_slice(&zlib(b"descriptor data"));
        assert_eq!(decode_response(&raw, true).unwrap(), b"descriptor data");
    }

    #[test]
    fn bad_status() {
        let raw = b"HTTP/1.0 404 Not found\r\n\r\nnothing here";
        assert!(matches!(
            decode_response(raw, false),
            Err(Error::BadResponse(404))
        ));
    }

    #[test]
    fn garbage_compressed_body() {
        let raw = b"HTTP/1.0 200 OK\r\n\r\nthis is not zlib data";
        assert!(matches!(
            decode_response(raw, true),
            Err(Error::Compression)
        ));
    }
}
