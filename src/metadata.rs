// Metadata body sent when an upload session is opened. The field names
// follow the video resource's `snippet` and `status` parts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MetadataError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyStatus {
    Public,
    Private,
    Unlisted,
}

impl PrivacyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyStatus::Public => "public",
            PrivacyStatus::Private => "private",
            PrivacyStatus::Unlisted => "unlisted",
        }
    }
}

impl FromStr for PrivacyStatus {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(PrivacyStatus::Public),
            "private" => Ok(PrivacyStatus::Private),
            "unlisted" => Ok(PrivacyStatus::Unlisted),
            other => Err(MetadataError::InvalidPrivacyStatus(other.to_string())),
        }
    }
}

impl fmt::Display for PrivacyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    pub category_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub privacy_status: PrivacyStatus,
}

/// Body of the insert request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub snippet: Snippet,
    pub status: Status,
}

impl VideoMetadata {
    /// Validate raw user input and assemble the body.
    ///
    /// `keywords` is a comma-separated list; blank entries are dropped and an
    /// empty list leaves `tags` unset. `privacy` must be `public`, `private`
    /// or `unlisted`.
    pub fn build(
        title: &str,
        description: &str,
        keywords: &str,
        category: &str,
        privacy: &str,
    ) -> Result<Self, MetadataError> {
        if title.trim().is_empty() {
            return Err(MetadataError::EmptyTitle);
        }
        if category.is_empty() || !category.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MetadataError::InvalidCategory(category.to_string()));
        }
        let privacy_status = privacy.parse::<PrivacyStatus>()?;

        Ok(VideoMetadata {
            snippet: Snippet {
                title: title.to_string(),
                description: description.to_string(),
                tags: split_keywords(keywords),
                category_id: category.to_string(),
            },
            status: Status { privacy_status },
        })
    }

    /// Value for the `part` query parameter: the body's top-level keys.
    pub fn parts(&self) -> &'static str {
        "snippet,status"
    }
}

fn split_keywords(keywords: &str) -> Option<Vec<String>> {
    let tags: Vec<String> = keywords
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(String::from)
        .collect();
    if tags.is_empty() {
        None
    } else {
        Some(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_serializes_camel_case() {
        let metadata =
            VideoMetadata::build("Holiday", "Beach trip", "sea, sand,,sun ", "22", "unlisted")
                .unwrap();
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(
            value,
            json!({
                "snippet": {
                    "title": "Holiday",
                    "description": "Beach trip",
                    "tags": ["sea", "sand", "sun"],
                    "categoryId": "22",
                },
                "status": {"privacyStatus": "unlisted"},
            })
        );
    }

    #[test]
    fn test_empty_keywords_omit_tags() {
        let metadata = VideoMetadata::build("t", "d", "", "22", "public").unwrap();
        assert_eq!(metadata.snippet.tags, None);
        let value = serde_json::to_value(&metadata).unwrap();
        assert!(value["snippet"].get("tags").is_none());
    }

    #[test]
    fn test_rejects_unknown_privacy_status() {
        let err = VideoMetadata::build("t", "d", "", "22", "friends-only").unwrap_err();
        assert_eq!(
            err,
            MetadataError::InvalidPrivacyStatus("friends-only".to_string())
        );
        // Matching is exact.
        assert!("Public".parse::<PrivacyStatus>().is_err());
    }

    #[test]
    fn test_rejects_non_numeric_category() {
        assert_eq!(
            VideoMetadata::build("t", "d", "", "music", "public").unwrap_err(),
            MetadataError::InvalidCategory("music".to_string())
        );
        assert!(VideoMetadata::build("t", "d", "", "", "public").is_err());
    }

    #[test]
    fn test_rejects_blank_title() {
        assert_eq!(
            VideoMetadata::build("  ", "d", "", "22", "public").unwrap_err(),
            MetadataError::EmptyTitle
        );
    }
}
