//! Anki `.apkg` archive writer.
//!
//! An `.apkg` is a zip holding a `collection.anki2` SQLite database, a
//! `media` JSON map from entry number to file name, and one numbered entry
//! per media file. The collection carries one deck and one three-field note
//! type (Front, Back, Tags); every note yields one new card.

use crate::error::FlashdeckError;
use crate::package::{stable_id, PackageManifest, PackagedCard};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Separator between note fields in `notes.flds`.
const FIELD_SEPARATOR: &str = "\x1f";

const SCHEMA: &str = r#"
CREATE TABLE col (
    id integer primary key, crt integer not null, mod integer not null,
    scm integer not null, ver integer not null, dty integer not null,
    usn integer not null, ls integer not null, conf text not null,
    models text not null, decks text not null, dconf text not null,
    tags text not null
);
CREATE TABLE notes (
    id integer primary key, guid text not null unique, mid integer not null,
    mod integer not null, usn integer not null, tags text not null,
    flds text not null, sfld text not null, csum integer not null,
    flags integer not null, data text not null
);
CREATE TABLE cards (
    id integer primary key, nid integer not null, did integer not null,
    ord integer not null, mod integer not null, usn integer not null,
    type integer not null, queue integer not null, due integer not null,
    ivl integer not null, factor integer not null, reps integer not null,
    lapses integer not null, left integer not null, odue integer not null,
    odid integer not null, flags integer not null, data text not null
);
CREATE TABLE revlog (
    id integer primary key, cid integer not null, usn integer not null,
    ease integer not null, ivl integer not null, lastIvl integer not null,
    factor integer not null, time integer not null, type integer not null
);
CREATE TABLE graves (usn integer not null, oid integer not null, type integer not null);
CREATE INDEX ix_cards_nid on cards (nid);
CREATE INDEX ix_cards_sched on cards (did, queue, due);
CREATE INDEX ix_cards_usn on cards (usn);
CREATE INDEX ix_notes_usn on notes (usn);
CREATE INDEX ix_notes_csum on notes (csum);
CREATE INDEX ix_revlog_usn on revlog (usn);
CREATE INDEX ix_revlog_cid on revlog (cid);
"#;

const FRONT_TEMPLATE: &str = r#"<div class="front">{{Front}}</div>"#;

const BACK_TEMPLATE: &str = r#"<div class="front">{{Front}}</div>
<hr id="answer">
<div class="back">{{Back}}</div>
<div class="tags">{{Tags}}</div>"#;

const CARD_CSS: &str = r#".card {
    font-family: arial, sans-serif;
    font-size: 20px;
    text-align: left;
    color: black;
    background-color: white;
    padding: 20px;
}
.front { margin-bottom: 10px; text-align: center; }
.back { margin-top: 10px; text-align: center; }
.tags { margin-top: 20px; font-size: 12px; color: #888; font-style: italic; }
img { max-width: 100%; height: auto; display: block; margin: 10px auto; }
code { background-color: #f4f4f4; padding: 2px 6px; border-radius: 3px; font-family: monospace; }
hr#answer { margin: 15px 0; border: none; border-top: 2px solid #ccc; }
"#;

const LATEX_PRE: &str = "\\documentclass[12pt]{article}\n\\special{papersize=3in,5in}\n\\usepackage[utf8]{inputenc}\n\\usepackage{amssymb,amsmath}\n\\pagestyle{empty}\n\\setlength{\\parindent}{0in}\n\\begin{document}\n";

/// What went into one archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApkgSummary {
    pub path: PathBuf,
    pub notes: usize,
    /// Cards left out because an identical front and back was already added.
    pub duplicates: usize,
    pub media: usize,
}

/// Note type id for a model name.
pub fn model_id(model_name: &str) -> i64 {
    i64::from(stable_id(&format!("model:{model_name}")))
}

/// Note guid: stable for the same deck, front and back.
fn note_guid(deck_id: u32, card: &PackagedCard) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let key = format!("{deck_id}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{}", card.front, card.back);
    for b in key.bytes() {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{hash:016x}")
}

/// Sort-field checksum for duplicate lookups inside Anki.
fn field_checksum(text: &str) -> i64 {
    text.chars()
        .enumerate()
        .fold(0i64, |sum, (i, ch)| {
            sum.wrapping_add(i64::from(u32::from(ch)).wrapping_mul(i as i64 + 1))
        })
        & 0x7fff_ffff
}

fn models_json(manifest: &PackageManifest, mid: i64, now: i64) -> serde_json::Value {
    let field = |name: &str, ord: i32| {
        json!({
            "name": name, "ord": ord, "sticky": false, "rtl": false,
            "font": "Arial", "size": 20, "media": []
        })
    };
    let key = mid.to_string();
    json!({
        key: {
            "id": mid,
            "name": manifest.model_name,
            "type": 0,
            "mod": now,
            "usn": -1,
            "sortf": 0,
            "did": i64::from(manifest.deck_id),
            "tmpls": [{
                "name": "Card 1", "ord": 0,
                "qfmt": FRONT_TEMPLATE, "afmt": BACK_TEMPLATE,
                "bqfmt": "", "bafmt": "", "did": null
            }],
            "flds": [field("Front", 0), field("Back", 1), field("Tags", 2)],
            "css": CARD_CSS,
            "latexPre": LATEX_PRE,
            "latexPost": "\\end{document}",
            "tags": [],
            "vers": [],
            "req": [[0, "any", [0]]]
        }
    })
}

fn decks_json(manifest: &PackageManifest, now: i64) -> serde_json::Value {
    let deck = |id: i64, name: &str| {
        json!({
            "id": id, "name": name, "mod": now, "usn": -1, "desc": "",
            "dyn": 0, "conf": 1, "collapsed": false, "browserCollapsed": true,
            "extendNew": 10, "extendRev": 50,
            "newToday": [0, 0], "revToday": [0, 0], "lrnToday": [0, 0], "timeToday": [0, 0]
        })
    };
    let did = i64::from(manifest.deck_id);
    let key = did.to_string();
    json!({
        "1": deck(1, "Default"),
        key: deck(did, &manifest.deck_name),
    })
}

fn dconf_json(now: i64) -> serde_json::Value {
    json!({
        "1": {
            "id": 1, "name": "Default", "mod": now, "usn": 0,
            "maxTaken": 60, "timer": 0, "autoplay": true, "replayq": true,
            "new": { "perDay": 20, "delays": [1, 10], "ints": [1, 4, 7],
                     "initialFactor": 2500, "separate": true, "order": 1, "bury": true },
            "rev": { "perDay": 200, "ivlFct": 1.0, "maxIvl": 36500, "ease4": 1.3,
                     "bury": true, "minSpace": 1 },
            "lapse": { "leechFails": 8, "minInt": 1, "leechAction": 0,
                       "delays": [10], "mult": 0.0 }
        }
    })
}

fn collection_conf(mid: i64, did: i64) -> serde_json::Value {
    json!({
        "nextPos": 1, "estTimes": true, "activeDecks": [did], "sortType": "noteFld",
        "timeLim": 0, "sortBackwards": false, "addToCur": true, "curDeck": did,
        "newSpread": 0, "dueCounts": true, "curModel": mid.to_string(), "collapseTime": 1200
    })
}

/// Create `collection.anki2` at `db_path`. Returns (notes written, duplicates skipped).
fn write_collection(db_path: &Path, manifest: &PackageManifest) -> rusqlite::Result<(usize, usize)> {
    let mut conn = Connection::open(db_path)?;
    conn.execute_batch(SCHEMA)?;

    let now = Utc::now();
    let secs = now.timestamp();
    let base_id = now.timestamp_millis();
    let mid = model_id(&manifest.model_name);
    let did = i64::from(manifest.deck_id);

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO col (id, crt, mod, scm, ver, dty, usn, ls, conf, models, decks, dconf, tags) \
         VALUES (1, ?1, ?2, ?3, 11, 0, 0, 0, ?4, ?5, ?6, ?7, '{}')",
        params![
            secs,
            base_id,
            base_id,
            collection_conf(mid, did).to_string(),
            models_json(manifest, mid, secs).to_string(),
            decks_json(manifest, secs).to_string(),
            dconf_json(secs).to_string(),
        ],
    )?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut notes = 0usize;
    for card in &manifest.cards {
        let guid = note_guid(manifest.deck_id, card);
        if !seen.insert(guid.clone()) {
            continue;
        }
        let id = base_id + notes as i64;
        let tags = card.tags.join(" ");
        let flds = [card.front.as_str(), card.back.as_str(), tags.as_str()].join(FIELD_SEPARATOR);
        tx.execute(
            "INSERT INTO notes (id, guid, mid, mod, usn, tags, flds, sfld, csum, flags, data) \
             VALUES (?1, ?2, ?3, ?4, -1, ?5, ?6, ?7, ?8, 0, '')",
            params![
                id,
                guid,
                mid,
                secs,
                format!(" {tags} "),
                flds,
                card.front,
                field_checksum(&card.front)
            ],
        )?;
        tx.execute(
            "INSERT INTO cards (id, nid, did, ord, mod, usn, type, queue, due, ivl, factor, \
             reps, lapses, left, odue, odid, flags, data) \
             VALUES (?1, ?2, ?3, 0, ?4, -1, 0, 0, ?5, 0, 0, 0, 0, 0, 0, 0, 0, '')",
            params![id, id, did, secs, notes as i64 + 1],
        )?;
        notes += 1;
    }
    tx.commit()?;
    conn.close().map_err(|(_, e)| e)?;
    Ok((notes, manifest.cards.len() - notes))
}

/// Write the archive for `manifest` to `out`, replacing any existing file.
///
/// Blocking: call it from `spawn_blocking`.
pub fn write_apkg(manifest: &PackageManifest, out: &Path) -> Result<ApkgSummary, FlashdeckError> {
    let fail = |detail: String| FlashdeckError::PackageFailed {
        path: out.to_path_buf(),
        detail,
    };

    let scratch = tempfile::tempdir().map_err(|e| fail(format!("scratch directory: {e}")))?;
    let db_path = scratch.path().join("collection.anki2");
    let (notes, duplicates) =
        write_collection(&db_path, manifest).map_err(|e| fail(format!("collection database: {e}")))?;
    if duplicates > 0 {
        warn!("{}: {} duplicate card(s) left out of the archive", manifest.unit, duplicates);
    }
    let collection = std::fs::read(&db_path).map_err(|e| fail(format!("reading collection: {e}")))?;

    let dir = match out.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| fail(e.to_string()))?;
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| fail(e.to_string()))?;

    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(tmp);
    let zip_err = |e: zip::result::ZipError| fail(format!("archive: {e}"));
    zip.start_file("collection.anki2", options).map_err(zip_err)?;
    zip.write_all(&collection).map_err(|e| fail(e.to_string()))?;

    let mut media_map: BTreeMap<String, String> = BTreeMap::new();
    for (i, path) in manifest.media.iter().enumerate() {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!("{}: skipping media with unusable name {}", manifest.unit, path.display());
            continue;
        };
        let bytes = std::fs::read(path).map_err(|e| fail(format!("media {}: {e}", path.display())))?;
        let entry = i.to_string();
        zip.start_file(entry.as_str(), options).map_err(zip_err)?;
        zip.write_all(&bytes).map_err(|e| fail(e.to_string()))?;
        media_map.insert(entry, name.to_string());
    }

    let media_json = serde_json::to_vec(&media_map).map_err(|e| fail(format!("media map: {e}")))?;
    zip.start_file("media", options).map_err(zip_err)?;
    zip.write_all(&media_json).map_err(|e| fail(e.to_string()))?;

    let tmp = zip.finish().map_err(zip_err)?;
    tmp.persist(out).map_err(|e| fail(e.error.to_string()))?;
    debug!("{}: archive written to {}", manifest.unit, out.display());

    Ok(ApkgSummary {
        path: out.to_path_buf(),
        notes,
        duplicates,
        media: media_map.len(),
    })
}
