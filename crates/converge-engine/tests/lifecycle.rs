//! End-to-end lifecycle tests against an in-memory fake cloud.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use converge_core::{ApiError, IdSpec, Kind, Schema, SchemaEntry, Value};
use converge_engine::{
    finder, handler, EngineError, Provider, ProviderMeta, ResourceType, Timeouts,
};

#[derive(Default)]
struct FakeCloud {
    records: Mutex<HashMap<String, (String, i64)>>,
    next_id: AtomicU32,
    create_calls: AtomicU32,
    update_calls: AtomicU32,
    delete_calls: AtomicU32,
}

impl FakeCloud {
    fn size_of(&self, id: &str) -> Option<i64> {
        self.records.lock().unwrap().get(id).map(|(_, s)| *s)
    }

    fn set_size(&self, id: &str, size: i64) {
        self.records.lock().unwrap().get_mut(id).unwrap().1 = size;
    }
}

fn widget_schema(name_forces_new: bool) -> Schema {
    let name = if name_forces_new {
        SchemaEntry::required(Kind::String).force_new()
    } else {
        SchemaEntry::required(Kind::String)
    };
    Schema::from([
        ("name".to_string(), name),
        (
            "size".to_string(),
            SchemaEntry::optional(Kind::Int).with_default(Value::Int(1)),
        ),
    ])
}

fn widget_type(cloud: Arc<FakeCloud>, name_forces_new: bool) -> ResourceType {
    let create = {
        let cloud = Arc::clone(&cloud);
        handler(move |data, _meta| {
            let cloud = Arc::clone(&cloud);
            Box::pin(async move {
                cloud.create_calls.fetch_add(1, Ordering::SeqCst);
                let id = format!("r-{}", cloud.next_id.fetch_add(1, Ordering::SeqCst) + 1);
                let name = data.get_string("name").unwrap();
                let size = data.get_i64("size").unwrap();
                cloud.records.lock().unwrap().insert(id.clone(), (name, size));
                data.set_id(id);
                Ok(())
            })
        })
    };
    let read = {
        let cloud = Arc::clone(&cloud);
        handler(move |data, _meta| {
            let cloud = Arc::clone(&cloud);
            Box::pin(async move {
                let record = cloud.records.lock().unwrap().get(data.id()).cloned();
                match record {
                    Some((name, size)) => {
                        data.set("name", Value::String(name))?;
                        data.set("size", Value::Int(size))?;
                        Ok(())
                    }
                    None => Err(finder::not_found(format!("GetWidget {}", data.id()))),
                }
            })
        })
    };
    let update = {
        let cloud = Arc::clone(&cloud);
        handler(move |data, _meta| {
            let cloud = Arc::clone(&cloud);
            Box::pin(async move {
                cloud.update_calls.fetch_add(1, Ordering::SeqCst);
                let name = data.get_string("name").unwrap();
                let size = data.get_i64("size").unwrap();
                cloud
                    .records
                    .lock()
                    .unwrap()
                    .insert(data.id().to_string(), (name, size));
                Ok(())
            })
        })
    };
    let delete = {
        let cloud = Arc::clone(&cloud);
        handler(move |data, _meta| {
            let cloud = Arc::clone(&cloud);
            Box::pin(async move {
                cloud.delete_calls.fetch_add(1, Ordering::SeqCst);
                match cloud.records.lock().unwrap().remove(data.id()) {
                    Some(_) => Ok(()),
                    None => Err(finder::not_found(format!("DeleteWidget {}", data.id()))),
                }
            })
        })
    };

    ResourceType::new("widget", widget_schema(name_forces_new), create, read, delete)
        .with_update(update)
}

fn provider_with_widget(name_forces_new: bool) -> (Provider, Arc<FakeCloud>) {
    let cloud = Arc::new(FakeCloud::default());
    let mut provider = Provider::new(ProviderMeta::new("us-east-1", "123456789012"));
    provider
        .register(widget_type(Arc::clone(&cloud), name_forces_new))
        .unwrap();
    (provider, cloud)
}

fn desired(name: &str, size: i64) -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("name".to_string(), Value::String(name.into())),
        ("size".to_string(), Value::Int(size)),
    ])
}

#[tokio::test]
async fn create_assigns_id_and_hydrates_state() {
    let (provider, cloud) = provider_with_widget(false);
    let (id, state) = provider
        .apply("widget", "", BTreeMap::new(), Some(desired("a", 1)))
        .await
        .unwrap();

    assert_eq!(id, "r-1");
    assert_eq!(state["name"], Value::String("a".into()));
    assert_eq!(state["size"], Value::Int(1));
    assert_eq!(cloud.size_of("r-1"), Some(1));
}

#[tokio::test]
async fn refresh_picks_up_out_of_band_drift() {
    let (provider, cloud) = provider_with_widget(false);
    let (id, state) = provider
        .apply("widget", "", BTreeMap::new(), Some(desired("a", 1)))
        .await
        .unwrap();

    cloud.set_size(&id, 2);

    let (id2, refreshed) = provider.refresh("widget", &id, state).await.unwrap();
    assert_eq!(id2, id);
    assert_eq!(refreshed["name"], Value::String("a".into()));
    assert_eq!(refreshed["size"], Value::Int(2));
}

#[tokio::test]
async fn force_new_change_replaces_the_resource() {
    let (provider, cloud) = provider_with_widget(true);
    let (id1, state1) = provider
        .apply("widget", "", BTreeMap::new(), Some(desired("a", 1)))
        .await
        .unwrap();
    assert_eq!(id1, "r-1");

    let (id2, state2) = provider
        .apply("widget", &id1, state1, Some(desired("b", 1)))
        .await
        .unwrap();

    assert_eq!(id2, "r-2");
    assert_ne!(id1, id2);
    assert_eq!(state2["name"], Value::String("b".into()));
    assert_eq!(state2["size"], Value::Int(1));
    // The old remote object is gone, the new one exists.
    assert_eq!(cloud.size_of("r-1"), None);
    assert_eq!(cloud.size_of("r-2"), Some(1));
    assert_eq!(cloud.delete_calls.load(Ordering::SeqCst), 1);
    assert_eq!(cloud.update_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn plain_change_updates_in_place_and_preserves_the_id() {
    let (provider, cloud) = provider_with_widget(true);
    let (id, state) = provider
        .apply("widget", "", BTreeMap::new(), Some(desired("a", 1)))
        .await
        .unwrap();

    let (id2, state2) = provider
        .apply("widget", &id, state, Some(desired("a", 5)))
        .await
        .unwrap();

    assert_eq!(id2, id);
    assert_eq!(state2["size"], Value::Int(5));
    assert_eq!(cloud.size_of(&id), Some(5));
    assert_eq!(cloud.update_calls.load(Ordering::SeqCst), 1);
    assert_eq!(cloud.delete_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unchanged_apply_is_a_noop() {
    let (provider, cloud) = provider_with_widget(false);
    let (id, state) = provider
        .apply("widget", "", BTreeMap::new(), Some(desired("a", 1)))
        .await
        .unwrap();

    let (id2, _) = provider
        .apply("widget", &id, state, Some(desired("a", 1)))
        .await
        .unwrap();

    assert_eq!(id2, id);
    assert_eq!(cloud.update_calls.load(Ordering::SeqCst), 0);
    assert_eq!(cloud.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn delete_clears_the_id() {
    let (provider, cloud) = provider_with_widget(false);
    let (id, state) = provider
        .apply("widget", "", BTreeMap::new(), Some(desired("a", 1)))
        .await
        .unwrap();

    let (id2, state2) = provider.apply("widget", &id, state, None).await.unwrap();
    assert_eq!(id2, "");
    assert!(state2.is_empty());
    assert_eq!(cloud.size_of(&id), None);
}

#[tokio::test]
async fn deleting_a_missing_remote_is_success() {
    let (provider, _cloud) = provider_with_widget(false);
    // Never created remotely; the delete handler reports NotFound.
    let (id, state) = provider
        .apply("widget", "r-99", BTreeMap::new(), None)
        .await
        .unwrap();
    assert_eq!(id, "");
    assert!(state.is_empty());
}

#[tokio::test]
async fn refresh_on_a_vanished_resource_clears_state_without_error() {
    let (provider, _cloud) = provider_with_widget(false);
    let (id, state) = provider
        .refresh("widget", "r-99", BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(id, "");
    assert!(state.is_empty());
}

#[tokio::test]
async fn vanished_resource_is_recreated_on_apply() {
    let (provider, cloud) = provider_with_widget(false);
    let (id, state) = provider
        .apply("widget", "", BTreeMap::new(), Some(desired("a", 1)))
        .await
        .unwrap();

    cloud.records.lock().unwrap().remove(&id);

    let (id2, state2) = provider
        .apply("widget", &id, state, Some(desired("a", 1)))
        .await
        .unwrap();
    assert_ne!(id2, id);
    assert_eq!(state2["name"], Value::String("a".into()));
}

#[tokio::test]
async fn not_found_after_create_is_an_error_not_drift() {
    let cloud = Arc::new(FakeCloud::default());
    let mut rt = widget_type(Arc::clone(&cloud), false);
    // Sabotage read: the remote never shows the new resource.
    rt.read = handler(|_data, _meta| {
        Box::pin(async { Err(finder::not_found("GetWidget after create")) })
    });
    let mut provider = Provider::new(ProviderMeta::new("us-east-1", "123456789012"));
    provider.register(rt).unwrap();

    let err = provider
        .apply("widget", "", BTreeMap::new(), Some(desired("a", 1)))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn validation_fails_before_any_remote_call() {
    let (provider, cloud) = provider_with_widget(false);
    let bad = BTreeMap::from([
        ("name".to_string(), Value::String("a".into())),
        ("size".to_string(), Value::String("big".into())),
    ]);
    let err = provider
        .apply("widget", "", BTreeMap::new(), Some(bad))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("expected int"));
    assert_eq!(cloud.create_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_and_missing_required_attributes_are_rejected() {
    let (provider, _cloud) = provider_with_widget(false);
    let err = provider
        .apply(
            "widget",
            "",
            BTreeMap::new(),
            Some(BTreeMap::from([("color".to_string(), Value::Int(1))])),
        )
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("unknown attribute"));
    assert!(msg.contains("required attribute"));
}

#[tokio::test]
async fn registry_is_frozen_after_the_first_apply() {
    let (mut provider, cloud) = provider_with_widget(false);
    provider
        .apply("widget", "", BTreeMap::new(), Some(desired("a", 1)))
        .await
        .unwrap();

    let late = widget_type(cloud, false);
    let mut renamed = late;
    renamed.name = "widget2".to_string();
    assert!(matches!(
        provider.register(renamed),
        Err(EngineError::RegistryFrozen)
    ));
}

#[tokio::test]
async fn replace_delete_sees_the_prior_state() {
    // Delete handlers read persisted attributes (a force-destroy flag,
    // typically); the replace path must hand them the instance's state.
    let live: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let next = Arc::new(AtomicU32::new(0));
    let seen_purge: Arc<Mutex<Option<bool>>> = Arc::new(Mutex::new(None));

    let schema = Schema::from([
        (
            "name".to_string(),
            SchemaEntry::required(Kind::String).force_new(),
        ),
        (
            "purge".to_string(),
            SchemaEntry::optional(Kind::Bool).with_default(Value::Bool(false)),
        ),
    ]);

    let create = {
        let live = Arc::clone(&live);
        let next = Arc::clone(&next);
        handler(move |data, _meta| {
            let live = Arc::clone(&live);
            let next = Arc::clone(&next);
            Box::pin(async move {
                let id = format!("g-{}", next.fetch_add(1, Ordering::SeqCst) + 1);
                live.lock().unwrap().insert(id.clone());
                data.set_id(id);
                Ok(())
            })
        })
    };
    let read = {
        let live = Arc::clone(&live);
        handler(move |data, _meta| {
            let live = Arc::clone(&live);
            Box::pin(async move {
                if live.lock().unwrap().contains(data.id()) {
                    Ok(())
                } else {
                    Err(finder::not_found(format!("GetGuarded {}", data.id())))
                }
            })
        })
    };
    let delete = {
        let live = Arc::clone(&live);
        let seen = Arc::clone(&seen_purge);
        handler(move |data, _meta| {
            let live = Arc::clone(&live);
            let seen = Arc::clone(&seen);
            Box::pin(async move {
                *seen.lock().unwrap() = Some(data.get_bool("purge").unwrap_or(false));
                live.lock().unwrap().remove(data.id());
                Ok(())
            })
        })
    };
    let noop = handler(|_, _| Box::pin(async { Ok(()) }));

    let mut provider = Provider::new(ProviderMeta::new("us-east-1", "123456789012"));
    provider
        .register(ResourceType::new("guarded", schema, create, read, delete).with_update(noop))
        .unwrap();

    let config = |name: &str| {
        BTreeMap::from([
            ("name".to_string(), Value::String(name.into())),
            ("purge".to_string(), Value::Bool(true)),
        ])
    };
    let (id1, state1) = provider
        .apply("guarded", "", BTreeMap::new(), Some(config("a")))
        .await
        .unwrap();

    let (id2, _) = provider
        .apply("guarded", &id1, state1, Some(config("b")))
        .await
        .unwrap();

    assert_ne!(id1, id2);
    assert_eq!(*seen_purge.lock().unwrap(), Some(true));
}

#[tokio::test]
async fn failed_create_carries_partial_state() {
    // The remote allocated the resource before the handler failed; the
    // host must still learn the id and observed attributes.
    let cloud = Arc::new(FakeCloud::default());
    let mut rt = widget_type(Arc::clone(&cloud), false);
    let sabotage = Arc::clone(&cloud);
    rt.create = handler(move |data, _meta| {
        let cloud = Arc::clone(&sabotage);
        Box::pin(async move {
            cloud
                .records
                .lock()
                .unwrap()
                .insert("r-1".to_string(), ("a".to_string(), 1));
            data.set_id("r-1");
            Err(EngineError::Api(ApiError::new("InternalError", "simulated")))
        })
    });
    let mut provider = Provider::new(ProviderMeta::new("us-east-1", "123456789012"));
    provider.register(rt).unwrap();

    let err = provider
        .apply("widget", "", BTreeMap::new(), Some(desired("a", 1)))
        .await
        .unwrap_err();

    let (id, state) = err.partial_state().expect("partial state missing");
    assert_eq!(id, "r-1");
    assert_eq!(state["name"], Value::String("a".into()));
    assert_eq!(state["size"], Value::Int(1));
}

#[tokio::test]
async fn timed_out_create_carries_partial_state() {
    let cloud = Arc::new(FakeCloud::default());
    let mut rt = widget_type(Arc::clone(&cloud), false).with_timeouts(Timeouts {
        create: Duration::from_millis(20),
        ..Timeouts::default()
    });
    let slow = Arc::clone(&cloud);
    rt.create = handler(move |data, _meta| {
        let cloud = Arc::clone(&slow);
        Box::pin(async move {
            cloud
                .records
                .lock()
                .unwrap()
                .insert("r-1".to_string(), ("a".to_string(), 1));
            data.set_id("r-1");
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
    });
    let mut provider = Provider::new(ProviderMeta::new("us-east-1", "123456789012"));
    provider.register(rt).unwrap();

    let err = provider
        .apply("widget", "", BTreeMap::new(), Some(desired("a", 1)))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    let (id, state) = err.partial_state().expect("partial state missing");
    assert_eq!(id, "r-1");
    assert_eq!(state["size"], Value::Int(1));
}

// ── import ──────────────────────────────────────────────────────────────

fn table_provider(existing: &[&str]) -> Provider {
    let known: Arc<HashSet<String>> =
        Arc::new(existing.iter().map(|s| s.to_string()).collect());

    let schema = Schema::from([
        (
            "table".to_string(),
            SchemaEntry::required(Kind::String).force_new(),
        ),
        (
            "hash".to_string(),
            SchemaEntry::required(Kind::String).force_new(),
        ),
        (
            "range".to_string(),
            SchemaEntry::optional(Kind::String).force_new(),
        ),
    ]);

    let read = {
        let known = Arc::clone(&known);
        handler(move |data, _meta| {
            let known = Arc::clone(&known);
            Box::pin(async move {
                if known.contains(data.id()) {
                    Ok(())
                } else {
                    Err(finder::not_found(format!("DescribeIndex {}", data.id())))
                }
            })
        })
    };
    let noop = handler(|_, _| Box::pin(async { Ok(()) }));

    let def = ResourceType::new("index", schema, noop.clone(), read, noop)
        .with_importer(IdSpec::new(vec![
            converge_core::id::IdSegment::required("table"),
            converge_core::id::IdSegment::required("hash"),
            converge_core::id::IdSegment::optional("range"),
        ]));

    let mut provider = Provider::new(ProviderMeta::new("us-east-1", "123456789012"));
    provider.register(def).unwrap();
    provider
}

#[tokio::test]
async fn import_re_emits_the_canonical_pipe_id() {
    let provider = table_provider(&["table1|hashA|rangeB"]);
    let data = provider
        .import("index", "table1|hashA|rangeB")
        .await
        .unwrap();
    assert_eq!(data.id(), "table1|hashA|rangeB");
    assert_eq!(data.get_string("table").as_deref(), Some("table1"));
    assert_eq!(data.get_string("hash").as_deref(), Some("hashA"));
    assert_eq!(data.get_string("range").as_deref(), Some("rangeB"));
}

#[tokio::test]
async fn json_array_import_produces_the_same_canonical_id() {
    let provider = table_provider(&["table1|hashA|rangeB"]);
    let data = provider
        .import("index", r#"["table1","hashA","rangeB"]"#)
        .await
        .unwrap();
    assert_eq!(data.id(), "table1|hashA|rangeB");
}

#[tokio::test]
async fn importing_a_missing_resource_is_fatal() {
    let provider = table_provider(&[]);
    let err = provider
        .import("index", "table1|hashA|rangeB")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Import(_)));
}

#[tokio::test]
async fn malformed_import_ids_are_rejected() {
    let provider = table_provider(&["table1|hashA|rangeB"]);
    assert!(provider.import("index", "table1").await.is_err());
    assert!(provider.import("index", "|hashA|rangeB").await.is_err());
}
