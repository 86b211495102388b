//! The value that travels through the capture pipeline.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Record of a single capture-to-upload run.
///
/// Stages never mutate a record they were handed; they derive a new one with
/// their own field populated (`with_*`). Organization and instance ids are
/// fixed at construction and have no setters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapRecord {
    org_id: String,
    instance_id: String,
    session_id: String,
    user_id: String,
    tag: String,
    /// Id assigned by the upload endpoint.
    snap_id: Option<String>,
    /// Current image on disk (raw capture, then the composed image).
    src_path: Option<PathBuf>,
    thumb_path: Option<PathBuf>,
    thumb_uploaded: bool,
}

impl SnapRecord {
    pub fn new(
        org_id: impl Into<String>,
        instance_id: impl Into<String>,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            org_id: org_id.into(),
            instance_id: instance_id.into(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            tag: tag.into(),
            snap_id: None,
            src_path: None,
            thumb_path: None,
            thumb_uploaded: false,
        }
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn snap_id(&self) -> Option<&str> {
        self.snap_id.as_deref()
    }

    pub fn src_path(&self) -> Option<&Path> {
        self.src_path.as_deref()
    }

    pub fn thumb_path(&self) -> Option<&Path> {
        self.thumb_path.as_deref()
    }

    pub fn thumb_uploaded(&self) -> bool {
        self.thumb_uploaded
    }

    /// Returns a copy pointing at a new source image.
    pub fn with_src_path(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            src_path: Some(path.into()),
            ..self.clone()
        }
    }

    /// Returns a copy carrying the generated thumbnail.
    pub fn with_thumb_path(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            thumb_path: Some(path.into()),
            ..self.clone()
        }
    }

    /// Returns a copy carrying the id assigned by the upload endpoint.
    pub fn with_snap_id(&self, id: impl Into<String>) -> Self {
        Self {
            snap_id: Some(id.into()),
            ..self.clone()
        }
    }

    /// Returns a copy with the thumbnail marked as uploaded.
    pub fn with_thumb_uploaded(&self) -> Self {
        Self {
            thumb_uploaded: true,
            ..self.clone()
        }
    }
}

impl fmt::Display for SnapRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Snap org={} instance={} session={} user={} tag={}",
            self.org_id, self.instance_id, self.session_id, self.user_id, self.tag
        )?;
        if let Some(id) = &self.snap_id {
            write!(f, " id={}", id)?;
        }
        if let Some(path) = &self.src_path {
            write!(f, " src={}", path.display())?;
        }
        if let Some(path) = &self.thumb_path {
            write!(f, " thumb={}", path.display())?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SnapRecord {
        SnapRecord::new("org1", "i1", "s1", "u1", "t1")
    }

    #[test]
    fn test_new_record_has_no_derived_fields() {
        let r = record();
        assert_eq!(r.org_id(), "org1");
        assert_eq!(r.instance_id(), "i1");
        assert_eq!(r.session_id(), "s1");
        assert_eq!(r.user_id(), "u1");
        assert_eq!(r.tag(), "t1");
        assert!(r.snap_id().is_none());
        assert!(r.src_path().is_none());
        assert!(r.thumb_path().is_none());
        assert!(!r.thumb_uploaded());
    }

    #[test]
    fn test_with_updates_leave_original_untouched() {
        let original = record();
        let captured = original.with_src_path("/snaps/abc.jpg");

        assert!(original.src_path().is_none());
        assert_eq!(captured.src_path(), Some(Path::new("/snaps/abc.jpg")));
        assert_eq!(captured.org_id(), original.org_id());
        assert_eq!(captured.instance_id(), original.instance_id());
    }

    #[test]
    fn test_updates_accumulate() {
        let r = record()
            .with_src_path("/snaps/abc.processed.png")
            .with_thumb_path("/snaps/abc.processed.thumb.jpg")
            .with_snap_id("snap-42")
            .with_thumb_uploaded();

        assert_eq!(r.snap_id(), Some("snap-42"));
        assert_eq!(
            r.thumb_path(),
            Some(Path::new("/snaps/abc.processed.thumb.jpg"))
        );
        assert!(r.thumb_uploaded());
    }

    #[test]
    fn test_display_includes_identity() {
        let text = record().with_snap_id("x").to_string();
        assert!(text.contains("org=org1"));
        assert!(text.contains("instance=i1"));
        assert!(text.contains("id=x"));
    }
}
