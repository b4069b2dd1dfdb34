//! Response construction on top of the `http` types.
//!
//! Request parsing, framing and status lines are left to hyper. This module
//! only decides what a download, a `HEAD` answer and a rejection look like.

use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{ALLOW, CONNECTION, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

use crate::FileOffer;

/// Body type shared by every response the server sends.
pub(crate) type ServeBody = UnsyncBoxBody<Bytes, std::io::Error>;

/// RFC 5987 `attr-char`: alphanumerics plus `!#$&+-.^_`|~`.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// `200 OK` carrying `offer` as an attachment.
pub(crate) fn download(offer: &FileOffer, body: ServeBody) -> http::Result<Response<ServeBody>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(CONTENT_DISPOSITION, content_disposition(&offer.download_name))
        .header(CONTENT_LENGTH, offer.size)
        .header(CONNECTION, "close")
        .body(body)
}

/// Headers of a download with no body, for `HEAD`.
pub(crate) fn head(offer: &FileOffer) -> http::Result<Response<ServeBody>> {
    download(offer, empty())
}

/// Short plain-text error response. `405` advertises the allowed methods.
pub(crate) fn rejection(status: StatusCode) -> http::Result<Response<ServeBody>> {
    let text = format!("{status}\n");

    let mut builder = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(CONTENT_LENGTH, text.len())
        .header(CONNECTION, "close");
    if status == StatusCode::METHOD_NOT_ALLOWED {
        builder = builder.header(ALLOW, "GET, HEAD");
    }

    builder.body(Full::new(Bytes::from(text)).map_err(|never| match never {}).boxed_unsync())
}

/// Stream at most `size` bytes of `file` in `buffer_size` chunks. `on_sent`
/// receives the running total after each chunk is handed to the connection.
pub(crate) fn file_body<F>(
    file: tokio::fs::File,
    size: u64,
    buffer_size: usize,
    mut on_sent: F,
) -> ServeBody
where
    F: FnMut(u64) + Send + 'static,
{
    let mut sent = 0u64;
    let frames = ReaderStream::with_capacity(file.take(size), buffer_size).map(
        move |chunk| -> std::io::Result<Frame<Bytes>> {
            let chunk = chunk?;
            sent += chunk.len() as u64;
            on_sent(sent);
            Ok(Frame::data(chunk))
        },
    );

    StreamBody::new(frames).boxed_unsync()
}

fn empty() -> ServeBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// `Content-Disposition` value for `name`. Names that are not plain
/// printable ASCII get an ASCII fallback plus an RFC 5987 `filename*`.
pub(crate) fn content_disposition(name: &str) -> String {
    let is_plain = |c: char| c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\';

    if name.chars().all(is_plain) {
        return format!("attachment; filename=\"{name}\"");
    }

    let fallback: String = name
        .chars()
        .map(|c| if is_plain(c) { c } else { '_' })
        .collect();

    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        utf8_percent_encode(name, ATTR_CHAR)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(name: &str, size: u64) -> FileOffer {
        FileOffer {
            path: "unused".into(),
            download_name: name.into(),
            size,
        }
    }

    #[test]
    fn download_headers() {
        let response = head(&offer("woof-rs.tar.gz", 42)).unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers();
        assert_eq!(headers[CONTENT_TYPE], "application/octet-stream");
        assert_eq!(
            headers[CONTENT_DISPOSITION],
            "attachment; filename=\"woof-rs.tar.gz\""
        );
        assert_eq!(headers[CONTENT_LENGTH], "42");
        assert_eq!(headers[CONNECTION], "close");
    }

    #[test]
    fn method_not_allowed_advertises_allow() {
        let response = rejection(StatusCode::METHOD_NOT_ALLOWED).unwrap();
        assert_eq!(response.headers()[ALLOW], "GET, HEAD");
        assert_eq!(response.headers()[CONTENT_LENGTH], "23");

        let response = rejection(StatusCode::BAD_REQUEST).unwrap();
        assert!(response.headers().get(ALLOW).is_none());
    }

    #[test]
    fn content_disposition_escapes_unusual_names() {
        assert_eq!(
            content_disposition("notes.txt"),
            "attachment; filename=\"notes.txt\""
        );

        let cd = content_disposition("résumé \"final\".pdf");
        assert!(cd.starts_with("attachment; filename=\"r_sum_ _final_.pdf\""));
        assert!(cd.contains("filename*=UTF-8''r%C3%A9sum%C3%A9%20%22final%22.pdf"));
    }

    #[test]
    fn unicode_disposition_is_a_valid_header_value() {
        let response = head(&offer("日本語.txt", 1)).unwrap();
        let value = response.headers()[CONTENT_DISPOSITION].to_str().unwrap();
        assert!(value.contains("filename*=UTF-8''%E6%97%A5%E6%9C%AC%E8%AA%9E.txt"));
    }
}
