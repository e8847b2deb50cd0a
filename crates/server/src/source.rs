//! Feeds the validated cache from a JSON export file.
//!
//! The file uses the validator export layout: a `roa` array of
//! `{asn, prefix, maxLength, ta}` objects and an optional `routerKeys`
//! array of `{asns, ski, spki, ta}` with hex encoded key material.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cache::{
    AnnouncementSet, Asn, Prefix, RouteOrigin, RouterCertificate, TrustAnchorId, ValidatedCache,
};
use rtr::SKI_LEN;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid entry: {0}")]
    Invalid(String),
}

/// Announcement sets parsed from one export, keyed by trust anchor.
pub type ExportSets = BTreeMap<TrustAnchorId, AnnouncementSet>;

#[derive(Debug, Deserialize)]
struct JsonExport {
    #[serde(default)]
    roa: Vec<ExportRoaPrefix>,
    #[serde(default, rename = "routerKeys")]
    router_keys: Vec<ExportRouterKey>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportRoaPrefix {
    asn: AsnField,
    prefix: String,
    max_length: Option<u8>,
    ta: String,
}

#[derive(Debug, Deserialize)]
struct ExportRouterKey {
    asns: Vec<AsnField>,
    ski: String,
    spki: String,
    ta: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AsnField {
    Number(u32),
    Text(String),
}

impl AsnField {
    fn to_asn(&self) -> Result<Asn, SourceError> {
        match self {
            AsnField::Number(number) => Ok(Asn(*number)),
            AsnField::Text(text) => text
                .parse::<Asn>()
                .map_err(|err| SourceError::Invalid(format!("{err}"))),
        }
    }
}

pub fn load_export(path: &Path) -> Result<ExportSets, SourceError> {
    let contents = fs::read_to_string(path)?;
    parse_export(&contents)
}

/// Parse a whole export. Any invalid entry rejects the export.
pub fn parse_export(contents: &str) -> Result<ExportSets, SourceError> {
    let export: JsonExport = serde_json::from_str(contents)?;
    let mut sets = ExportSets::new();

    for entry in export.roa {
        let prefix: Prefix = entry
            .prefix
            .parse()
            .map_err(|err| SourceError::Invalid(format!("{err}")))?;
        let max_len = entry.max_length.unwrap_or(prefix.length());
        let origin = RouteOrigin::new(entry.asn.to_asn()?, prefix, max_len)
            .map_err(|err| SourceError::Invalid(format!("{err}")))?;
        sets.entry(TrustAnchorId::new(entry.ta))
            .or_default()
            .route_origins
            .insert(origin);
    }

    for entry in export.router_keys {
        let ski: [u8; SKI_LEN] = hex::decode(&entry.ski)
            .map_err(|err| SourceError::Invalid(format!("ski: {err}")))?
            .try_into()
            .map_err(|bytes: Vec<u8>| {
                SourceError::Invalid(format!("ski has {} bytes, expected {SKI_LEN}", bytes.len()))
            })?;
        let spki =
            hex::decode(&entry.spki).map_err(|err| SourceError::Invalid(format!("spki: {err}")))?;
        let asns = entry
            .asns
            .iter()
            .map(AsnField::to_asn)
            .collect::<Result<Vec<_>, _>>()?;
        sets.entry(TrustAnchorId::new(entry.ta))
            .or_default()
            .router_certificates
            .push(RouterCertificate { asns, ski, spki });
    }

    Ok(sets)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
}

/// Push `sets` into the cache. Trust anchors missing from `sets` are
/// removed and identical sets are left alone.
pub fn apply_export(cache: &ValidatedCache, sets: ExportSets) -> ApplySummary {
    let current = cache.current_snapshot();
    let mut summary = ApplySummary::default();

    let stale: Vec<TrustAnchorId> = current
        .trust_anchors()
        .filter(|trust_anchor| !sets.contains_key(*trust_anchor))
        .cloned()
        .collect();

    // Updates first, so a payload moving between trust anchors stays
    // present at every intermediate serial.
    for (trust_anchor, set) in sets {
        if current.get(&trust_anchor) == Some(&set) {
            summary.unchanged += 1;
            continue;
        }
        cache.update(trust_anchor, set);
        summary.updated += 1;
    }

    for trust_anchor in stale {
        if cache.remove(&trust_anchor).is_some() {
            summary.removed += 1;
        }
    }
    summary
}

const MIN_RELOAD_INTERVAL: Duration = Duration::from_secs(1);

/// Reload `path` every `interval` until the task is dropped. Failed loads
/// keep the previous data. Intervals below one second are raised to it.
pub async fn run_source_task(cache: Arc<ValidatedCache>, path: PathBuf, interval: Duration) {
    let mut ticker = tokio::time::interval(interval.max(MIN_RELOAD_INTERVAL));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) => {
                warn!(path = %path.display(), error = ?err, "failed to read source");
                continue;
            }
        };
        match parse_export(&contents) {
            Ok(sets) => {
                let summary = apply_export(&cache, sets);
                if summary.updated + summary.removed > 0 {
                    info!(
                        path = %path.display(),
                        updated = summary.updated,
                        removed = summary.removed,
                        "source reloaded"
                    );
                } else {
                    debug!(path = %path.display(), "source unchanged");
                }
            }
            Err(err) => warn!(path = %path.display(), error = %err, "rejected source"),
        }
    }
}
