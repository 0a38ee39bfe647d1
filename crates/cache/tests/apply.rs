#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use stagehand_cache::memory::WriteOp;
use stagehand_cache::{MemoryStore, ObjectCache};
use stagehand_core::prelude::*;
use stagehand_core::DebugOptions;

fn meta(ns: &str, name: &str) -> ObjectMeta {
    ObjectMeta { name: Some(name.into()), namespace: Some(ns.into()), ..Default::default() }
}

fn config_map(name: &str, value: &str) -> ConfigMap {
    ConfigMap {
        metadata: meta("ns", name),
        data: Some(BTreeMap::from([("k".to_string(), value.to_string())])),
        ..Default::default()
    }
}

fn setup(options: Options) -> (Arc<MemoryStore>, ObjectCache) {
    let store = Arc::new(MemoryStore::new());
    let cache = ObjectCache::new(store.clone(), Arc::new(Scheme::with_builtins()), CacheConfig::new(options));
    (store, cache)
}

#[tokio::test]
async fn dependent_kinds_are_written_after_everything_else() {
    let (store, mut cache) = setup(Options::default());

    // staged first on purpose
    let deploy = ResourceIdent::single::<Deployment>("app", "deployment");
    cache
        .create(&deploy, &InstanceKey::new("ns", "web"), Deployment { metadata: meta("ns", "web"), ..Default::default() })
        .await
        .unwrap();
    let maps = ResourceIdent::multi::<ConfigMap>("app", "config");
    for i in 0..250 {
        let name = format!("cm-{i:03}");
        cache.create(&maps, &InstanceKey::new("ns", &name), config_map(&name, "v")).await.unwrap();
    }

    cache.apply_all().await.unwrap();

    let writes = store.writes();
    assert_eq!(writes.len(), 251);
    assert!(writes.iter().all(|w| w.op == WriteOp::Create));
    let last = writes.last().unwrap();
    assert_eq!(last.kind.kind, "Deployment");
    let deploy_seq = last.seq;
    assert!(writes.iter().filter(|w| w.kind.kind == "ConfigMap").all(|w| w.seq < deploy_seq));
    // same rank keeps staging order
    assert_eq!(writes[0].key.name, "cm-000");
    assert_eq!(writes[249].key.name, "cm-249");
}

#[tokio::test]
async fn custom_ordering_is_honoured() {
    let ordering = ["Job", "*", "Secret"].iter().map(|s| s.to_string()).collect();
    let (store, mut cache) = setup(Options { ordering, ..Default::default() });

    let secret = ResourceIdent::single::<Secret>("db", "creds");
    cache.create(&secret, &InstanceKey::new("ns", "s"), Secret { metadata: meta("ns", "s"), ..Default::default() }).await.unwrap();
    let svc = ResourceIdent::single::<Service>("db", "svc");
    cache.create(&svc, &InstanceKey::new("ns", "svc"), Service { metadata: meta("ns", "svc"), ..Default::default() }).await.unwrap();
    let job = ResourceIdent::single::<Job>("db", "migrate");
    cache.create(&job, &InstanceKey::new("ns", "j"), Job { metadata: meta("ns", "j"), ..Default::default() }).await.unwrap();

    cache.apply_all().await.unwrap();
    let kinds: Vec<String> = store.writes().into_iter().map(|w| w.kind.kind).collect();
    assert_eq!(kinds, vec!["Job", "Service", "Secret"]);
}

#[tokio::test]
async fn unchanged_existing_objects_are_not_written() {
    let (store, mut cache) = setup(Options::default());
    let kind = ResourceKind::of::<ConfigMap>();
    store.seed(&kind, serde_json::to_value(config_map("cfg", "v")).unwrap());

    let ident = ResourceIdent::single::<ConfigMap>("app", "config");
    cache.create(&ident, &InstanceKey::new("ns", "cfg"), ConfigMap::default()).await.unwrap();
    cache.apply_all().await.unwrap();
    assert_eq!(store.write_count(), 0);

    // a real change goes out as an update
    let mut cm: ConfigMap = cache.get(&ident, None).unwrap();
    cm.data.as_mut().unwrap().insert("k".into(), "v2".into());
    cache.update(&ident, &cm).await.unwrap();
    cache.apply_all().await.unwrap();
    let writes = store.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].op, WriteOp::Update);
    let live = store.object(&kind, &InstanceKey::new("ns", "cfg")).unwrap();
    assert_eq!(live["data"]["k"], "v2");
}

#[tokio::test]
async fn update_back_to_the_baseline_skips_the_write() {
    let (store, mut cache) = setup(Options::default());
    let kind = ResourceKind::of::<ConfigMap>();
    store.seed(&kind, serde_json::to_value(config_map("cfg", "v")).unwrap());

    let ident = ResourceIdent::single::<ConfigMap>("app", "config");
    let original = cache.create(&ident, &InstanceKey::new("ns", "cfg"), ConfigMap::default()).await.unwrap();
    let mut changed = original.clone();
    changed.data.as_mut().unwrap().insert("k".into(), "other".into());
    cache.update(&ident, &changed).await.unwrap();
    cache.update(&ident, &original).await.unwrap();

    cache.apply_all().await.unwrap();
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn status_is_written_even_when_the_object_is_skipped() {
    let (store, mut cache) = setup(Options::default());
    let kind = ResourceKind::of::<Service>();
    store.seed(&kind, serde_json::to_value(Service { metadata: meta("ns", "svc"), ..Default::default() }).unwrap());

    let ident = ResourceIdent::single::<Service>("app", "svc");
    let svc = cache.create(&ident, &InstanceKey::new("ns", "svc"), Service::default()).await.unwrap();
    cache.status(&ident, &svc).unwrap();
    cache.apply_all().await.unwrap();

    assert_eq!(store.write_count(), 0);
    assert_eq!(store.status_writes(), 1);
}

#[tokio::test]
async fn write_now_identifiers_bypass_the_batch() {
    let (store, mut cache) = setup(Options::default());
    let ident = ResourceIdent::single::<ConfigMap>("app", "lock").write_now();
    let key = InstanceKey::new("ns", "lock");

    let cm = cache.create(&ident, &key, config_map("lock", "a")).await.unwrap();
    assert_eq!(store.write_count(), 0);

    // first update creates it since it did not exist when staged
    cache.update(&ident, &cm).await.unwrap();
    assert_eq!(store.writes().iter().map(|w| w.op).collect::<Vec<_>>(), vec![WriteOp::Create]);

    // the staged copy now carries what the store assigned
    let written: ConfigMap = cache.get(&ident, None).unwrap();
    let live = store.object(&ResourceKind::of::<ConfigMap>(), &key).unwrap();
    assert_eq!(written.metadata.uid.as_deref(), live["metadata"]["uid"].as_str());
    assert!(written.metadata.uid.is_some());
    assert_eq!(written.metadata.resource_version.as_deref(), Some("1"));

    // unchanged: skipped
    cache.update(&ident, &written).await.unwrap();
    assert_eq!(store.write_count(), 1);

    // changed: update, not a second create
    let mut cm2 = written.clone();
    cm2.data.as_mut().unwrap().insert("k".into(), "b".into());
    cache.update(&ident, &cm2).await.unwrap();
    let ops: Vec<WriteOp> = store.writes().iter().map(|w| w.op).collect();
    assert_eq!(ops, vec![WriteOp::Create, WriteOp::Update]);

    cache.apply_all().await.unwrap();
    assert_eq!(store.write_count(), 2);
    assert!(cache.apply_order().is_empty());
}

#[tokio::test]
async fn write_now_updates_carry_the_status_write() {
    let (store, mut cache) = setup(Options::default());
    let kind = ResourceKind::of::<Service>();
    store.seed(&kind, serde_json::to_value(Service { metadata: meta("ns", "svc"), ..Default::default() }).unwrap());

    let ident = ResourceIdent::single::<Service>("app", "svc").write_now();
    let svc = cache.create(&ident, &InstanceKey::new("ns", "svc"), Service::default()).await.unwrap();
    cache.status(&ident, &svc).unwrap();
    cache.update(&ident, &svc).await.unwrap();

    assert_eq!(store.write_count(), 0);
    assert_eq!(store.status_writes(), 1);
}

#[tokio::test]
async fn applied_objects_read_back_with_server_metadata() {
    let (store, mut cache) = setup(Options::default());
    let ident = ResourceIdent::multi::<ConfigMap>("app", "config");
    let key = InstanceKey::new("ns", "a");
    cache.create(&ident, &key, config_map("a", "1")).await.unwrap();
    cache.apply_all().await.unwrap();

    let cm: ConfigMap = cache.get(&ident, Some(&key)).unwrap();
    assert!(cm.metadata.uid.is_some());
    assert!(cm.metadata.creation_timestamp.is_some());

    // a second pass over the unchanged value writes nothing more
    cache.update(&ident, &cm).await.unwrap();
    cache.apply_all().await.unwrap();
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn fields_unknown_to_the_type_do_not_force_a_write() {
    let (store, mut cache) = setup(Options::default());
    let kind = ResourceKind::of::<ConfigMap>();
    let mut live = serde_json::to_value(config_map("cfg", "v")).unwrap();
    live["newServerField"] = serde_json::json!(true);
    store.seed(&kind, live);

    let ident = ResourceIdent::single::<ConfigMap>("app", "config");
    cache.create(&ident, &InstanceKey::new("ns", "cfg"), ConfigMap::default()).await.unwrap();
    let cm: ConfigMap = cache.get(&ident, None).unwrap();
    cache.update(&ident, &cm).await.unwrap();
    cache.apply_all().await.unwrap();
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn first_store_error_aborts_the_rest_of_the_batch() {
    let (store, mut cache) = setup(Options::default());
    let maps = ResourceIdent::multi::<ConfigMap>("app", "config");
    cache.create(&maps, &InstanceKey::new("ns", "a"), config_map("a", "1")).await.unwrap();
    let secret = ResourceIdent::single::<Secret>("app", "creds");
    cache.create(&secret, &InstanceKey::new("ns", "s"), Secret { metadata: meta("ns", "s"), ..Default::default() }).await.unwrap();
    cache.create(&maps, &InstanceKey::new("ns", "b"), config_map("b", "1")).await.unwrap();

    store.fail_writes_for("Secret");
    let err = cache.apply_all().await.unwrap_err();
    assert!(err.is_store(), "err={}", err);
    assert!(err.to_string().contains("injected write failure"), "err={}", err);

    let written: Vec<String> = store.writes().into_iter().map(|w| w.key.name).collect();
    assert_eq!(written, vec!["a"]);
}

#[tokio::test]
async fn create_surfaces_store_read_errors() {
    let (store, mut cache) = setup(Options::default());
    store.fail_reads(true);
    let ident = ResourceIdent::single::<ConfigMap>("app", "config");
    let err = cache.create(&ident, &InstanceKey::new("ns", "a"), config_map("a", "1")).await.unwrap_err();
    assert!(err.is_store(), "err={}", err);
    assert!(err.to_string().contains("injected read failure"), "err={}", err);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn objects_without_a_name_are_not_created() {
    let (store, mut cache) = setup(Options::default());
    let ident = ResourceIdent::single::<ConfigMap>("app", "placeholder");
    cache.create(&ident, &InstanceKey::new("ns", "later"), ConfigMap::default()).await.unwrap();
    cache.apply_all().await.unwrap();
    assert_eq!(store.write_count(), 0);
    assert!(store.is_empty());
    // still pending a create, so a named value later goes out as one
    assert!(cache.debug().contains("update=false"));
}

#[tokio::test]
async fn debug_diffs_do_not_change_behaviour() {
    let (store, mut cache) = setup(Options { debug: DebugOptions::all(), ..Default::default() });
    let ident = ResourceIdent::single::<Secret>("db", "creds");
    let s = cache.create(&ident, &InstanceKey::new("ns", "s"), Secret { metadata: meta("ns", "s"), ..Default::default() }).await.unwrap();
    cache.update(&ident, &s).await.unwrap();
    let maps = ResourceIdent::single::<ConfigMap>("app", "config");
    cache.create(&maps, &InstanceKey::new("ns", "a"), config_map("a", "1")).await.unwrap();
    cache.apply_all().await.unwrap();
    assert_eq!(store.write_count(), 2);
}
