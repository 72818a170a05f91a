//! Utility functions for retrieved-file naming and path collisions

use crate::config::FileCollisionAction;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Get a unique path for a file, handling collisions according to the specified action
///
/// For Rename, `movie.mp4` becomes `movie (1).mp4`, then `movie (2).mp4`, etc.
/// For Skip, an existing file is an error. For Overwrite, the path is returned unchanged.
///
/// # Examples
///
/// ```
/// use media_dl_client::utils::get_unique_path;
/// use media_dl_client::config::FileCollisionAction;
/// use std::path::Path;
///
/// let path = Path::new("/tmp/does-not-exist-media-dl/movie.mp4");
/// let unique = get_unique_path(path, FileCollisionAction::Rename).unwrap();
/// assert_eq!(unique, path);
/// ```
pub fn get_unique_path(path: &Path, action: FileCollisionAction) -> Result<PathBuf> {
    match action {
        FileCollisionAction::Overwrite => Ok(path.to_path_buf()),
        FileCollisionAction::Skip => {
            if path.exists() {
                return Err(Error::RetrievalFailed {
                    message: format!("{} already exists", path.display()),
                });
            }
            Ok(path.to_path_buf())
        }
        FileCollisionAction::Rename => {
            if !path.exists() {
                return Ok(path.to_path_buf());
            }

            let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(|| {
                Error::RetrievalFailed {
                    message: format!("cannot extract file stem from {}", path.display()),
                }
            })?;
            let extension = path.extension().and_then(|e| e.to_str());
            let parent = path.parent().ok_or_else(|| Error::RetrievalFailed {
                message: format!("cannot extract parent directory of {}", path.display()),
            })?;

            for i in 1..=MAX_RENAME_ATTEMPTS {
                let new_name = match extension {
                    Some(ext) => format!("{} ({}).{}", stem, i, ext),
                    None => format!("{} ({})", stem, i),
                };
                let new_path = parent.join(new_name);
                if !new_path.exists() {
                    return Ok(new_path);
                }
            }

            Err(Error::RetrievalFailed {
                message: format!(
                    "could not find a unique name for {} after {} attempts",
                    path.display(),
                    MAX_RENAME_ATTEMPTS
                ),
            })
        }
    }
}

/// Strip directory components so a server-supplied name cannot escape the target dir
fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next()?.trim();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}

/// Extract the file name (with extension) from an HTTP response
///
/// Tries `Content-Disposition` (`filename="..."`, `filename=...`, or RFC 5987
/// `filename*=UTF-8''...`), then the last URL path segment, then `download`.
pub fn extract_filename_from_response(response: &reqwest::Response, url: &str) -> String {
    if let Some(content_disposition) = response.headers().get(reqwest::header::CONTENT_DISPOSITION)
        && let Ok(value) = content_disposition.to_str()
        && let Some(name) = filename_from_content_disposition(value)
    {
        return name;
    }

    if let Ok(parsed_url) = url::Url::parse(url)
        && let Some(mut segments) = parsed_url.path_segments()
        && let Some(last_segment) = segments.next_back()
        && let Some(name) = sanitize_filename(last_segment)
    {
        return name;
    }

    "download".to_string()
}

fn filename_from_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    for part in value.split(';') {
        let part = part.trim();
        if let Some(encoded) = part.strip_prefix("filename*=") {
            // charset'lang'encoded-filename
            if let Some(idx) = encoded.rfind('\'')
                && let Ok(decoded) = urlencoding::decode(&encoded[idx + 1..])
                && let Some(name) = sanitize_filename(&decoded)
            {
                return Some(name);
            }
        } else if let Some(raw) = part.strip_prefix("filename=") {
            plain = sanitize_filename(raw.trim_matches('"'));
        }
    }
    plain
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use wiremock::MockServer;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    #[test]
    fn unique_path_for_missing_file_is_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clip.mp4");

        for action in [
            FileCollisionAction::Rename,
            FileCollisionAction::Overwrite,
            FileCollisionAction::Skip,
        ] {
            assert_eq!(get_unique_path(&path, action).unwrap(), path);
        }
    }

    #[test]
    fn rename_appends_counter_before_extension() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clip.mp4");
        fs::write(&path, b"a").unwrap();

        let first = get_unique_path(&path, FileCollisionAction::Rename).unwrap();
        assert_eq!(first, temp_dir.path().join("clip (1).mp4"));

        fs::write(&first, b"b").unwrap();
        let second = get_unique_path(&path, FileCollisionAction::Rename).unwrap();
        assert_eq!(second, temp_dir.path().join("clip (2).mp4"));
    }

    #[test]
    fn skip_refuses_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clip.mp4");
        fs::write(&path, b"a").unwrap();

        let err = get_unique_path(&path, FileCollisionAction::Skip).unwrap_err();
        assert!(matches!(err, Error::RetrievalFailed { .. }));
        assert_eq!(
            get_unique_path(&path, FileCollisionAction::Overwrite).unwrap(),
            path
        );
    }

    #[test]
    fn content_disposition_parsing() {
        assert_eq!(
            filename_from_content_disposition(r#"attachment; filename="My Clip.mp4""#).as_deref(),
            Some("My Clip.mp4")
        );
        assert_eq!(
            filename_from_content_disposition("attachment; filename=clip.webm").as_deref(),
            Some("clip.webm")
        );
        assert_eq!(
            filename_from_content_disposition(
                "attachment; filename=\"fallback.mp4\"; filename*=UTF-8''caf%C3%A9%20clip.mp4"
            )
            .as_deref(),
            Some("café clip.mp4")
        );
        assert_eq!(
            filename_from_content_disposition(r#"attachment; filename="../../etc/passwd""#)
                .as_deref(),
            Some("passwd")
        );
        assert_eq!(filename_from_content_disposition("inline"), None);
    }

    async fn mock_response(
        path_str: &str,
        template: ResponseTemplate,
    ) -> (reqwest::Response, String) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(path_str))
            .respond_with(template)
            .mount(&server)
            .await;

        let url = format!("{}{}", server.uri(), path_str);
        let resp = reqwest::get(&url).await.unwrap();
        (resp, url)
    }

    #[tokio::test]
    async fn header_takes_priority_over_url() {
        let (resp, url) = mock_response(
            "/download_file/abc",
            ResponseTemplate::new(200).insert_header(
                "Content-Disposition",
                r#"attachment; filename="Real Title.mp4""#,
            ),
        )
        .await;

        assert_eq!(extract_filename_from_response(&resp, &url), "Real Title.mp4");
    }

    #[tokio::test]
    async fn falls_back_to_url_segment_then_download() {
        let (resp, url) = mock_response("/download_file/abc", ResponseTemplate::new(200)).await;
        assert_eq!(extract_filename_from_response(&resp, &url), "abc");

        let (resp, _url) = mock_response("/", ResponseTemplate::new(200)).await;
        assert_eq!(
            extract_filename_from_response(&resp, "http://example.com/"),
            "download"
        );
    }
}
