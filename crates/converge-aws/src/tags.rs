//! `TagSet` marshalling for the S3 tagging API.

use aws_sdk_s3::types::{Tag, Tagging};
use converge_core::{ApiError, TagSet};

pub fn to_tagging(tags: &TagSet) -> Result<Tagging, ApiError> {
    // Pre-seed the vec so an empty set still satisfies the builder's
    // required field.
    let mut builder = Tagging::builder().set_tag_set(Some(Vec::new()));
    for (key, value) in tags.iter() {
        let tag = Tag::builder()
            .key(key)
            .value(value)
            .build()
            .map_err(|e| ApiError::new("InvalidTag", e.to_string()))?;
        builder = builder.tag_set(tag);
    }
    builder
        .build()
        .map_err(|e| ApiError::new("InvalidTag", e.to_string()))
}

pub fn from_tags(tags: &[Tag]) -> TagSet {
    TagSet::from_pairs(tags.iter().map(|t| (t.key(), t.value())))
}
