use std::path::{Path, PathBuf};

/// Remove characters that are not safe in filenames.
///
/// Strips `/`, `\`, `:`, `*`, `?`, `"`, `<`, `>`, `|` and control
/// characters, then trims surrounding whitespace and dots so the result
/// cannot name a parent or hidden directory entry by accident.
pub fn clean_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .filter(|c| !c.is_control())
        .collect();
    cleaned.trim().trim_matches('.').to_string()
}

/// Filename carried by a `Content-Disposition` header, if any.
///
/// Prefers the RFC 5987 `filename*=UTF-8''...` form over plain `filename=`.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    for part in value.split(';').map(str::trim) {
        let Some((key, raw)) = part.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = raw
                    .trim()
                    .split_once("''")
                    .map(|(_, rest)| rest)
                    .unwrap_or(raw.trim());
                if let Ok(decoded) = urlencoding::decode(encoded) {
                    return Some(decoded.into_owned()).filter(|s| !s.is_empty());
                }
            }
            "filename" => {
                plain = Some(raw.trim().trim_matches('"').to_string());
            }
            _ => {}
        }
    }
    plain.filter(|s| !s.is_empty())
}

/// Last non-empty path segment of `url`.
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .and_then(|s| urlencoding::decode(s).ok())
        .map(|s| s.into_owned())
}

/// Temp path one transfer streams into before it is renamed into place.
/// `key` tells apart concurrent transfers aimed at the same target.
pub fn part_path(path: &Path, key: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.part", key));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_filename() {
        assert_eq!(clean_filename("IMG_0001.JPG"), "IMG_0001.JPG");
        assert_eq!(clean_filename("a/b\\c:d*e?f\"g<h>i|j.jpg"), "abcdefghij.jpg");
        assert_eq!(clean_filename("../etc/passwd"), "etcpasswd");
        assert_eq!(clean_filename("  été.jpg "), "été.jpg");
        assert_eq!(clean_filename(".."), "");
    }

    #[test]
    fn test_content_disposition_plain() {
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"iCloud Photos.zip\""),
            Some("iCloud Photos.zip".to_string())
        );
        assert_eq!(
            filename_from_content_disposition("attachment; filename=a.zip"),
            Some("a.zip".to_string())
        );
    }

    #[test]
    fn test_content_disposition_extended_wins() {
        assert_eq!(
            filename_from_content_disposition(
                "attachment; filename=\"e.jpg\"; filename*=UTF-8''%C3%A9t%C3%A9.jpg"
            ),
            Some("été.jpg".to_string())
        );
    }

    #[test]
    fn test_content_disposition_without_filename() {
        assert_eq!(filename_from_content_disposition("inline"), None);
        assert_eq!(filename_from_content_disposition("attachment; filename=\"\""), None);
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://cvws.icloud-content.com/B/abc/IMG_1.JPG?o=x"),
            Some("IMG_1.JPG".to_string())
        );
        assert_eq!(
            filename_from_url("https://cvws.icloud-content.com/B/abc/"),
            Some("abc".to_string())
        );
        assert_eq!(
            filename_from_url("https://cvws.icloud-content.com/B/IMG%20%C3%A9.JPG"),
            Some("IMG é.JPG".to_string())
        );
        assert_eq!(filename_from_url("https://cvws.icloud-content.com/"), None);
        assert_eq!(filename_from_url("not a url"), None);
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/tmp/x/IMG_1.JPG"), "k1"),
            PathBuf::from("/tmp/x/IMG_1.JPG.k1.part")
        );
        assert_ne!(
            part_path(Path::new("IMG_1.JPG"), "a"),
            part_path(Path::new("IMG_1.JPG"), "b")
        );
    }
}
