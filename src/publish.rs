use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// A published article or blog post, keyed by a generated id in
/// `publishes.json`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Publication {
    pub title: String,
    pub content: String,
    pub r#type: PublishKind,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishKind {
    Article,
    Blog,
}

impl PublishKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "article" | "Article" => Some(Self::Article),
            "blog" | "Blog" => Some(Self::Blog),
            _ => None,
        }
    }
}

impl Publication {
    pub fn new(title: &str, content: &str, kind: PublishKind) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            r#type: kind,
            timestamp: Timestamp::now(),
        }
    }

    pub fn matches(&self, query: Option<&str>, kind: Option<PublishKind>) -> bool {
        if let Some(kind) = kind {
            if self.r#type != kind {
                return false;
            }
        }
        match query {
            Some(q) if !q.is_empty() => {
                let q = q.to_lowercase();
                self.title.to_lowercase().contains(&q) || self.content.to_lowercase().contains(&q)
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn filters_by_kind_and_query() {
        let p = Publication::new("Budget Vote", "The council voted.", PublishKind::Article);

        assert!(p.matches(None, None));
        assert!(p.matches(Some("budget"), None));
        assert!(p.matches(Some("VOTED"), Some(PublishKind::Article)));
        assert!(!p.matches(None, Some(PublishKind::Blog)));
        assert!(!p.matches(Some("zoning"), None));
    }

    #[test]
    fn kind_serializes_lowercase() {
        let json = serde_json::to_string(&PublishKind::Blog).unwrap();
        assert_eq!(json, "\"blog\"");
        assert_eq!(PublishKind::parse("Article"), Some(PublishKind::Article));
        assert_eq!(PublishKind::parse("podcast"), None);
    }
}
