//! The `s3_bucket` resource type.
//!
//! Exercises the whole engine: schema validation, a finder, the retry
//! driver on create, the creation waiter, tag reconciliation, paged
//! object listing on force-destroy, and pipe-id import.

use std::sync::Arc;
use std::time::Duration;

use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use converge_core::{IdSpec, Kind, Schema, SchemaEntry, TagSet, Validation, Value};
use converge_engine::{
    finder, for_each_page, handler, retry, EngineError, HandlerFn, ResourceType, StateChangeConf,
};

use crate::classify;
use crate::tags::{from_tags, to_tagging};

/// Subsystem key for the shared S3 client on the provider context.
pub const SUBSYSTEM: &str = "s3";

const CREATE_TIMEOUT: Duration = Duration::from_secs(120);

pub fn s3_bucket() -> ResourceType {
    ResourceType::new("s3_bucket", schema(), create(), read(), delete())
        .with_update(update())
        .with_importer(IdSpec::single("bucket"))
}

fn schema() -> Schema {
    Schema::from([
        (
            "bucket".to_string(),
            SchemaEntry::required(Kind::String)
                .force_new()
                .with_validator(validate_bucket_name),
        ),
        (
            "force_destroy".to_string(),
            SchemaEntry::optional(Kind::Bool).with_default(Value::Bool(false)),
        ),
        (
            "tags".to_string(),
            SchemaEntry::optional(Kind::Map(Box::new(Kind::String))),
        ),
        ("region".to_string(), SchemaEntry::computed(Kind::String)),
        ("arn".to_string(), SchemaEntry::computed(Kind::String)),
    ])
}

fn validate_bucket_name(value: &Value) -> Validation {
    let Some(name) = value.as_str() else {
        return Validation::ok();
    };
    if name.len() < 3 || name.len() > 63 {
        return Validation::error("bucket name must be between 3 and 63 characters");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Validation::error(
            "bucket name may only contain lowercase letters, digits, hyphens, and dots",
        );
    }
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric())
        || !name.ends_with(|c: char| c.is_ascii_alphanumeric())
    {
        return Validation::error("bucket name must begin and end with a letter or digit");
    }
    Validation::ok()
}

/// HeadBucket with the finder NotFound translation.
pub async fn find_bucket(client: &Client, bucket: &str) -> Result<(), EngineError> {
    match client.head_bucket().bucket(bucket).send().await {
        Ok(_) => Ok(()),
        Err(e) => {
            let err = e.into_service_error();
            if err.is_not_found() {
                Err(finder::not_found_with(err, format!("HeadBucket {bucket}")))
            } else {
                Err(classify::service_error(err).into())
            }
        }
    }
}

async fn bucket_tags(client: &Client, bucket: &str) -> Result<TagSet, EngineError> {
    match client.get_bucket_tagging().bucket(bucket).send().await {
        Ok(resp) => Ok(from_tags(resp.tag_set())),
        Err(e) => {
            let api = classify::service_error(e.into_service_error());
            // An untagged bucket is an empty set, not an error.
            if api.code == "NoSuchTagSet" {
                Ok(TagSet::new())
            } else {
                Err(api.into())
            }
        }
    }
}

fn config_tags(value: &Value) -> TagSet {
    match value.as_map() {
        Some(entries) => TagSet::from_pairs(
            entries
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))),
        ),
        None => TagSet::new(),
    }
}

fn tags_value(tags: &TagSet) -> Value {
    Value::Map(
        tags.iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect(),
    )
}

fn create() -> HandlerFn {
    handler(|data, meta| {
        Box::pin(async move {
            let client = meta.client::<Client>(SUBSYSTEM)?;
            let bucket = data.get_string("bucket").unwrap_or_default();
            let region = meta.region.clone();

            let create_client = Arc::clone(&client);
            let create_bucket = bucket.clone();
            retry(CREATE_TIMEOUT, move || {
                let client = Arc::clone(&create_client);
                let bucket = create_bucket.clone();
                let region = region.clone();
                async move {
                    let mut req = client.create_bucket().bucket(&bucket);
                    if region != "us-east-1" {
                        req = req.create_bucket_configuration(
                            CreateBucketConfiguration::builder()
                                .location_constraint(BucketLocationConstraint::from(
                                    region.as_str(),
                                ))
                                .build(),
                        );
                    }
                    match req.send().await {
                        Ok(_) => converge_engine::Attempt::Done(()),
                        Err(e) => {
                            classify::attempt(classify::service_error(e.into_service_error()).into())
                        }
                    }
                }
            })
            .await?;

            // CreateBucket returns before the bucket is consistently
            // visible; wait for HeadBucket to see it.
            let wait_client = Arc::clone(&client);
            let wait_bucket = bucket.clone();
            StateChangeConf::new(vec!["creating"], vec!["available"], move || {
                let client = Arc::clone(&wait_client);
                let bucket = wait_bucket.clone();
                async move {
                    match client.head_bucket().bucket(&bucket).send().await {
                        Ok(_) => Ok(Some(((), "available".to_string()))),
                        Err(e) => {
                            let err = e.into_service_error();
                            if err.is_not_found() {
                                Ok(None)
                            } else {
                                Err(EngineError::from(classify::service_error(err)))
                            }
                        }
                    }
                }
            })
            .with_timeout(CREATE_TIMEOUT)
            .with_poll_interval(Duration::from_secs(2))
            .with_min_delay(Duration::from_secs(1))
            .wait_for_state()
            .await?;

            let effective = meta.effective_tags(&config_tags(&data.get("tags")));
            if !effective.is_empty() {
                client
                    .put_bucket_tagging()
                    .bucket(&bucket)
                    .tagging(to_tagging(&effective)?)
                    .send()
                    .await
                    .map_err(|e| {
                        EngineError::from(classify::service_error(e.into_service_error()))
                    })?;
            }

            data.set_id(bucket);
            Ok(())
        })
    })
}

fn read() -> HandlerFn {
    handler(|data, meta| {
        Box::pin(async move {
            let client = meta.client::<Client>(SUBSYSTEM)?;
            let bucket = data.id().to_string();

            find_bucket(&client, &bucket).await?;

            let location = client
                .get_bucket_location()
                .bucket(&bucket)
                .send()
                .await
                .map_err(|e| EngineError::from(classify::service_error(e.into_service_error())))?;
            // us-east-1 reports an empty location constraint.
            let region = location
                .location_constraint()
                .map(|c| c.as_str().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "us-east-1".to_string());

            data.set("bucket", Value::String(bucket.clone()))?;
            data.set("region", Value::String(region))?;
            data.set("arn", Value::String(format!("arn:aws:s3:::{bucket}")))?;

            let visible = bucket_tags(&client, &bucket).await?.ignore(&meta.ignore_tags);
            if visible.is_empty() {
                data.set("tags", Value::Null)?;
            } else {
                data.set("tags", tags_value(&visible))?;
            }
            Ok(())
        })
    })
}

fn update() -> HandlerFn {
    handler(|data, meta| {
        Box::pin(async move {
            let client = meta.client::<Client>(SUBSYSTEM)?;
            let bucket = data.id().to_string();

            let desired = meta.effective_tags(&config_tags(&data.get("tags")));
            let current = bucket_tags(&client, &bucket).await?;
            let visible = current.ignore(&meta.ignore_tags);

            let diff = visible.diff(&desired);
            if diff.is_empty() {
                return Ok(());
            }

            // PutBucketTagging replaces the whole set, so the ignored keys
            // must be written back alongside the desired ones or they
            // would be lost.
            let preserved = TagSet::from_pairs(
                current
                    .iter()
                    .filter(|(k, _)| meta.ignore_tags.iter().any(|p| p.matches(k)))
                    .map(|(k, v)| (k.to_string(), v.to_string())),
            );
            let full = preserved.merge(&desired);

            if full.is_empty() {
                client
                    .delete_bucket_tagging()
                    .bucket(&bucket)
                    .send()
                    .await
                    .map_err(|e| {
                        EngineError::from(classify::service_error(e.into_service_error()))
                    })?;
            } else {
                client
                    .put_bucket_tagging()
                    .bucket(&bucket)
                    .tagging(to_tagging(&full)?)
                    .send()
                    .await
                    .map_err(|e| {
                        EngineError::from(classify::service_error(e.into_service_error()))
                    })?;
            }

            tracing::info!(
                bucket = %bucket,
                added = diff.add.len(),
                removed = diff.remove.len(),
                updated = diff.update.len(),
                "reconciled bucket tags"
            );
            Ok(())
        })
    })
}

fn delete() -> HandlerFn {
    handler(|data, meta| {
        Box::pin(async move {
            let client = meta.client::<Client>(SUBSYSTEM)?;
            let bucket = data.id().to_string();

            if data.get_bool("force_destroy").unwrap_or(false) {
                drain_bucket(&client, &bucket).await?;
            }

            match client.delete_bucket().bucket(&bucket).send().await {
                Ok(_) => {
                    tracing::info!(bucket = %bucket, "bucket deleted");
                    Ok(())
                }
                Err(e) => {
                    let api = classify::service_error(e.into_service_error());
                    if api.code == "NoSuchBucket" {
                        Err(finder::not_found_with(api, format!("DeleteBucket {bucket}")))
                    } else {
                        Err(api.into())
                    }
                }
            }
        })
    })
}

/// Delete every object in the bucket, page by page.
async fn drain_bucket(client: &Client, bucket: &str) -> Result<(), EngineError> {
    let mut keys: Vec<String> = Vec::new();
    for_each_page(
        |token| {
            let client = client.clone();
            let bucket = bucket.to_string();
            async move {
                let mut req = client.list_objects_v2().bucket(&bucket);
                if let Some(token) = token {
                    req = req.continuation_token(token);
                }
                match req.send().await {
                    Ok(resp) => {
                        let page: Vec<String> = resp
                            .contents()
                            .iter()
                            .filter_map(|o| o.key().map(str::to_string))
                            .collect();
                        let next = resp.next_continuation_token().map(str::to_string);
                        Ok((Some(page), next))
                    }
                    Err(e) => Err(EngineError::from(classify::service_error(
                        e.into_service_error(),
                    ))),
                }
            }
        },
        |page, _is_last| {
            keys.extend(page.iter().cloned());
            true
        },
    )
    .await?;

    tracing::info!(bucket = %bucket, objects = keys.len(), "force-destroy draining bucket");
    for key in keys {
        client
            .delete_object()
            .bucket(bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| EngineError::from(classify::service_error(e.into_service_error())))?;
    }
    Ok(())
}
