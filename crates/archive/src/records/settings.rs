//! Preferences and certificates: flat JSON objects merged key by key.

use super::{Record, RecordReader, RecordSink, RecordWriter};
use crate::context::Context;
use crate::error::{ClassifyExt, ErrorKind, Result};
use crate::progress::ProgressListener;
use crate::results::{Counter, ImportResults};
use crate::{ExportOptions, ExportResults, ImportOptions, RecordType};
use async_trait::async_trait;
use bindery_catalog::Repository;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The only certificate the catalogue keeps: the CA of the Calibre content
/// server it syncs with.
const CALIBRE_SERVER_CA: &str = "calibre_server_ca";
const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

fn object(record: Record) -> Result<Map<String, Value>> {
    let record_type = record.record_type;
    match record.into_json()? {
        Value::Object(map) => Ok(map),
        _ => exn::bail!(ErrorKind::Decode(record_type)),
    }
}

fn is_pem_certificate(s: &str) -> bool {
    let s = s.trim();
    s.starts_with(PEM_BEGIN) && s.ends_with(PEM_END) && s.len() > PEM_BEGIN.len() + PEM_END.len()
}

pub(crate) async fn export_preferences(catalog: &Repository) -> Result<(Value, u64)> {
    let preferences = catalog.get_preferences().await.or_classify()?;
    let count = preferences.len() as u64;
    Ok((Value::Object(preferences.into_iter().collect()), count))
}

pub(crate) async fn export_certificates(catalog: &Repository) -> Result<(Value, u64)> {
    let mut certificates = Map::new();
    if let Some(pem) = catalog.get_certificate(CALIBRE_SERVER_CA).await.or_classify()? {
        certificates.insert(CALIBRE_SERVER_CA.to_string(), Value::String(pem));
    }
    let count = certificates.len() as u64;
    Ok((Value::Object(certificates), count))
}

/// User preferences. Every key in the archive replaces the local value,
/// whatever the update policy: preferences have no identity beyond their
/// key and no modification time.
pub(crate) struct Preferences;

#[async_trait]
impl RecordReader for Preferences {
    async fn read(
        &self,
        ctx: &Context,
        _options: &ImportOptions,
        record: Record,
        _progress: &dyn ProgressListener,
    ) -> Result<ImportResults> {
        let incoming: BTreeMap<String, Value> = object(record)?.into_iter().collect();
        let local = ctx.catalog().get_preferences().await.or_classify()?;
        let updated = incoming.keys().filter(|key| local.contains_key(*key)).count() as u64;
        let counter = Counter {
            processed: incoming.len() as u64,
            created: incoming.len() as u64 - updated,
            updated,
            ..Counter::default()
        };
        ctx.catalog().upsert_preferences(&incoming).await.or_classify()?;
        tracing::info!(%counter, "Imported preferences");
        Ok(ImportResults::with_structural(RecordType::Preferences, counter))
    }
}

#[async_trait]
impl RecordWriter for Preferences {
    async fn write(
        &self,
        ctx: &Context,
        _options: &ExportOptions,
        _written: &ExportResults,
        sink: &mut dyn RecordSink,
        _progress: &dyn ProgressListener,
    ) -> Result<ExportResults> {
        let (value, count) = export_preferences(ctx.catalog()).await?;
        sink.put(Record::json(RecordType::Preferences, value))?;
        Ok(ExportResults::with_structural(RecordType::Preferences, count))
    }
}

/// Trusted certificates, stored as PEM.
pub(crate) struct Certificates;

#[async_trait]
impl RecordReader for Certificates {
    async fn read(
        &self,
        ctx: &Context,
        _options: &ImportOptions,
        record: Record,
        _progress: &dyn ProgressListener,
    ) -> Result<ImportResults> {
        let mut counter = Counter::default();
        for (name, value) in object(record)? {
            if name != CALIBRE_SERVER_CA {
                tracing::debug!(%name, "Skipping unknown certificate");
                continue;
            }
            counter.processed += 1;
            let Some(pem) = value.as_str().filter(|pem| is_pem_certificate(pem)) else {
                tracing::warn!(%name, "Skipping certificate that is not PEM encoded");
                counter.skipped += 1;
                continue;
            };
            let existed = ctx.catalog().get_certificate(&name).await.or_classify()?.is_some();
            ctx.catalog().set_certificate(&name, pem.trim()).await.or_classify()?;
            match existed {
                true => counter.updated += 1,
                false => counter.created += 1,
            }
        }
        Ok(ImportResults::with_structural(RecordType::Certificates, counter))
    }
}

#[async_trait]
impl RecordWriter for Certificates {
    async fn write(
        &self,
        ctx: &Context,
        _options: &ExportOptions,
        _written: &ExportResults,
        sink: &mut dyn RecordSink,
        _progress: &dyn ProgressListener,
    ) -> Result<ExportResults> {
        let (value, count) = export_certificates(ctx.catalog()).await?;
        if count > 0 {
            sink.put(Record::json(RecordType::Certificates, value))?;
        }
        Ok(ExportResults::with_structural(RecordType::Certificates, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::records::testing::{VecSink, empty_context};
    use crate::{ArchiveEncoding, UpdatePolicy};
    use serde_json::json;

    const PEM: &str = "-----BEGIN CERTIFICATE-----\nMIIBszCCAVmgAwIBAgIU\n-----END CERTIFICATE-----";

    #[test]
    fn test_pem_detection() {
        assert!(is_pem_certificate(PEM));
        assert!(is_pem_certificate(&format!("\n{PEM}\n")));
        assert!(!is_pem_certificate("not a certificate"));
        assert!(!is_pem_certificate("-----BEGIN CERTIFICATE----------END CERTIFICATE-----"));
    }

    #[tokio::test]
    async fn test_preferences_last_write_wins() {
        let ctx = empty_context().await;
        ctx.catalog().upsert_preferences(&BTreeMap::from([("theme".to_string(), json!("dark"))])).await.unwrap();
        let record = Record::json(RecordType::Preferences, json!({"theme": "light", "sort": "title"}));
        // Even under Skip: preferences always merge.
        let options = ImportOptions::default().with_policy(UpdatePolicy::Skip);
        let results = Preferences.read(&ctx, &options, record, &NoProgress).await.unwrap();

        assert_eq!(
            results.structural(RecordType::Preferences),
            Counter { processed: 2, created: 1, updated: 1, ..Counter::default() }
        );
        let stored = ctx.catalog().get_preferences().await.unwrap();
        assert_eq!(stored["theme"], json!("light"));
        assert_eq!(stored["sort"], json!("title"));
    }

    #[tokio::test]
    async fn test_preferences_must_be_an_object() {
        let ctx = empty_context().await;
        let record = Record::json(RecordType::Preferences, json!(["theme"]));
        let err = Preferences.read(&ctx, &ImportOptions::default(), record, &NoProgress).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Decode(RecordType::Preferences)));
    }

    #[tokio::test]
    async fn test_certificates() {
        let ctx = empty_context().await;
        let record = Record::json(RecordType::Certificates, json!({CALIBRE_SERVER_CA: "garbage", "other": PEM}));
        let results = Certificates.read(&ctx, &ImportOptions::default(), record, &NoProgress).await.unwrap();
        assert_eq!(results.structural(RecordType::Certificates).skipped, 1);
        assert!(ctx.catalog().get_certificate(CALIBRE_SERVER_CA).await.unwrap().is_none());

        let record = Record::json(RecordType::Certificates, json!({CALIBRE_SERVER_CA: PEM}));
        let results = Certificates.read(&ctx, &ImportOptions::default(), record, &NoProgress).await.unwrap();
        assert_eq!(results.structural(RecordType::Certificates).created, 1);
        assert_eq!(ctx.catalog().get_certificate(CALIBRE_SERVER_CA).await.unwrap().as_deref(), Some(PEM));
    }

    #[tokio::test]
    async fn test_export_skips_missing_certificate() {
        let ctx = empty_context().await;
        let options = ExportOptions::new(ArchiveEncoding::Zip);
        let mut sink = VecSink::default();
        let results = Certificates.write(&ctx, &options, &ExportResults::default(), &mut sink, &NoProgress).await.unwrap();
        assert_eq!(results.certificates, 0);
        assert!(sink.0.is_empty());

        ctx.catalog().set_certificate(CALIBRE_SERVER_CA, PEM).await.unwrap();
        let results = Certificates.write(&ctx, &options, &ExportResults::default(), &mut sink, &NoProgress).await.unwrap();
        assert_eq!(results.certificates, 1);
        assert_eq!(sink.0.pop().unwrap().into_json().unwrap(), json!({CALIBRE_SERVER_CA: PEM}));
    }
}
