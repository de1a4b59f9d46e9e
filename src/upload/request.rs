//! Upload request validation
//!
//! Turns the two form fields of an upload request into a validated
//! `(file, bucket, key)` triple. Validation is pure: it touches neither the
//! filesystem nor the admission pool, so it is safe to repeat.

use bytes::Bytes;
use futures::stream;
use percent_encoding::percent_decode_str;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::{ParseError, Url};

/// Validation errors
///
/// The display text is the response body sent to the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing field \"file\"")]
    MissingFile,

    #[error("missing field \"uri\"")]
    MissingUri,

    #[error("only absolute file paths are supported, {0:?}")]
    RelativePath(String),

    #[error("unable to parse URI, {0:?}")]
    BadUri(String),

    #[error("only s3 scheme is supported, {0:?}")]
    UnsupportedScheme(String),

    #[error("unable to parse bucket from URI, {0:?}")]
    MissingBucket(String),
}

impl ValidationError {
    /// Short machine-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::MissingFile => "missing_file",
            ValidationError::MissingUri => "missing_uri",
            ValidationError::RelativePath(_) => "relative_path",
            ValidationError::BadUri(_) => "bad_uri",
            ValidationError::UnsupportedScheme(_) => "unsupported_scheme",
            ValidationError::MissingBucket(_) => "missing_bucket",
        }
    }

    /// Name of the absent form field, if that is what failed
    pub fn missing_field(&self) -> Option<&'static str> {
        match self {
            ValidationError::MissingFile => Some("file"),
            ValidationError::MissingUri => Some("uri"),
            _ => None,
        }
    }
}

/// An upload request as received. Empty fields count as missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadRequest {
    pub file: String,
    pub uri: String,
}

impl UploadRequest {
    pub fn new(file: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            uri: uri.into(),
        }
    }

    /// Decode an `application/x-www-form-urlencoded` body.
    ///
    /// Only the first value of each field is used; unknown fields are ignored.
    pub fn from_form(body: &[u8]) -> Self {
        let mut file = None;
        let mut uri = None;

        for (name, value) in form_urlencoded::parse(body) {
            match name.as_ref() {
                "file" if file.is_none() => file = Some(value.into_owned()),
                "uri" if uri.is_none() => uri = Some(value.into_owned()),
                _ => {}
            }
        }

        Self {
            file: file.unwrap_or_default(),
            uri: uri.unwrap_or_default(),
        }
    }

    /// Decode a `multipart/form-data` body with the given boundary.
    ///
    /// Field rules match [`UploadRequest::from_form`].
    pub async fn from_multipart(
        body: Bytes,
        boundary: impl Into<String>,
    ) -> Result<Self, multer::Error> {
        let stream = stream::once(async move { Ok::<_, Infallible>(body) });
        let mut multipart = multer::Multipart::new(stream, boundary);

        let mut file = None;
        let mut uri = None;
        while let Some(field) = multipart.next_field().await? {
            let slot = match field.name() {
                Some("file") if file.is_none() => &mut file,
                Some("uri") if uri.is_none() => &mut uri,
                _ => continue,
            };
            *slot = Some(field.text().await?);
        }

        Ok(Self {
            file: file.unwrap_or_default(),
            uri: uri.unwrap_or_default(),
        })
    }

    /// Check the request and resolve its destination.
    ///
    /// Checks run in a fixed order and the first failure wins: `file`
    /// present, `uri` present, absolute path, parseable URI, `s3` scheme,
    /// non-empty bucket.
    pub fn validate(&self) -> Result<ValidatedUpload, ValidationError> {
        if self.file.is_empty() {
            return Err(ValidationError::MissingFile);
        }
        if self.uri.is_empty() {
            return Err(ValidationError::MissingUri);
        }
        if !Path::new(&self.file).is_absolute() {
            return Err(ValidationError::RelativePath(self.file.clone()));
        }

        let location = ObjectLocation::parse(&self.uri)?;

        Ok(ValidatedUpload {
            file: PathBuf::from(&self.file),
            uri: self.uri.clone(),
            location,
        })
    }
}

/// A request that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUpload {
    pub file: PathBuf,
    pub uri: String,
    pub location: ObjectLocation,
}

/// Bucket and key of a destination object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    /// Parse `s3://bucket/key`.
    ///
    /// The bucket is the URI host (a port, if any, stays part of it). The key
    /// is the decoded path with exactly one leading `/` removed, and may be
    /// empty. Query and fragment are ignored.
    ///
    /// # Example
    ///
    /// ```
    /// use s3nd::upload::ObjectLocation;
    ///
    /// let location = ObjectLocation::parse("s3://mybucket/a/b/c.txt").unwrap();
    /// assert_eq!(location.bucket, "mybucket");
    /// assert_eq!(location.key, "a/b/c.txt");
    /// ```
    pub fn parse(uri: &str) -> Result<Self, ValidationError> {
        // The URL parser silently drops tabs and newlines
        if uri.bytes().any(|b| b < 0x20 || b == 0x7f) {
            return Err(ValidationError::BadUri(uri.into()));
        }

        let parsed = match Url::parse(uri) {
            Ok(parsed) => parsed,
            Err(ParseError::RelativeUrlWithoutBase) if !has_colon_in_first_segment(uri) => {
                return Err(ValidationError::UnsupportedScheme(uri.into()))
            }
            Err(_) => return Err(ValidationError::BadUri(uri.into())),
        };

        if parsed.scheme() != "s3" {
            return Err(ValidationError::UnsupportedScheme(uri.into()));
        }

        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => percent_decode_str(host).decode_utf8_lossy(),
            _ => return Err(ValidationError::MissingBucket(uri.into())),
        };
        let bucket = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.into_owned(),
        };

        let path = parsed.path();
        if has_malformed_escape(path) {
            return Err(ValidationError::BadUri(uri.into()));
        }
        let path = path.strip_prefix('/').unwrap_or(path);
        let key = percent_decode_str(path).decode_utf8_lossy().into_owned();

        Ok(Self { bucket, key })
    }
}

/// `a:b/c` is a malformed URI rather than a relative path
fn has_colon_in_first_segment(uri: &str) -> bool {
    uri.split('/').next().is_some_and(|segment| segment.contains(':'))
}

/// A `%` not followed by two hex digits
fn has_malformed_escape(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.iter().enumerate().any(|(i, b)| {
        *b == b'%'
            && !bytes
                .get(i + 1..i + 3)
                .is_some_and(|escape| escape.iter().all(u8::is_ascii_hexdigit))
    })
}
