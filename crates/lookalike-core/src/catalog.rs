//! SQLite-backed identity/frame catalog.
//!
//! Two tables: `identities` holds one embedding per subject, `frames`
//! holds every stored pose/landmark observation with a foreign key back
//! to its identity. Array columns are blobs produced by [`ArrayCodec`].

use crate::codec::{ArrayCodec, DecodeError};
use crate::types::{CandidateFrame, Embedding, Frame, Identity, IdentityId, Landmarks, Pose};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, Transaction};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("identity {0} already exists in the catalog")]
    DuplicateIdentity(IdentityId),
    #[error("frame references unknown identity {0}")]
    UnknownIdentity(IdentityId),
    #[error("corrupt array column: {0}")]
    Decode(#[from] DecodeError),
    #[error("stored pose has {0} components, expected 3")]
    InvalidPose(usize),
}

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS identities (
    id INTEGER PRIMARY KEY,
    embedding BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS frames (
    identity_id INTEGER NOT NULL REFERENCES identities(id),
    image_path TEXT NOT NULL,
    pose BLOB NOT NULL,
    landmarks BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_frames_identity ON frames(identity_id);
";

/// Row counts reported by `lookalike info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub identities: u64,
    pub frames: u64,
}

/// Persistent catalog of identities and their frames.
pub struct CatalogStore {
    conn: Connection,
    codec: ArrayCodec,
}

impl CatalogStore {
    /// Open (or create) the catalog at `path`.
    pub fn open(path: impl AsRef<Path>, codec: ArrayCodec) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "catalog opened");
        Self::init(conn, codec)
    }

    pub fn open_in_memory(codec: ArrayCodec) -> Result<Self, CatalogError> {
        Self::init(Connection::open_in_memory()?, codec)
    }

    fn init(conn: Connection, codec: ArrayCodec) -> Result<Self, CatalogError> {
        conn.pragma_update(None, "foreign_keys", 1)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn, codec })
    }

    /// Store the embedding for a new identity. Fails with
    /// [`CatalogError::DuplicateIdentity`] if `id` is already present.
    pub fn insert_identity(
        &self,
        id: IdentityId,
        embedding: &Embedding,
    ) -> Result<(), CatalogError> {
        insert_identity(&self.conn, &self.codec, id, embedding)
    }

    /// Append a frame. The identity must already exist.
    pub fn insert_frame(
        &self,
        identity_id: IdentityId,
        image_path: &str,
        pose: &Pose,
        landmarks: &Landmarks,
    ) -> Result<(), CatalogError> {
        insert_frame(&self.conn, &self.codec, identity_id, image_path, pose, landmarks)
    }

    /// Begin a write batch. Dropping it without [`CatalogTransaction::commit`]
    /// rolls the batch back.
    pub fn transaction(&self) -> Result<CatalogTransaction<'_>, CatalogError> {
        Ok(CatalogTransaction {
            tx: self.conn.unchecked_transaction()?,
            codec: &self.codec,
        })
    }

    /// Every identity with its embedding, ordered by id.
    pub fn all_identity_embeddings(&self) -> Result<Vec<Identity>, CatalogError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, embedding FROM identities ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((IdentityId(row.get(0)?), row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, blob) = row?;
            out.push(Identity {
                id,
                embedding: Embedding::new(self.codec.decode_vector(&blob)?),
            });
        }
        Ok(out)
    }

    /// Path and pose of every frame whose identity is in `ids`, in
    /// insertion order.
    pub fn frames_for_identities(
        &self,
        ids: &[IdentityId],
    ) -> Result<Vec<CandidateFrame>, CatalogError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT identity_id, image_path, pose FROM frames \
             WHERE identity_id IN ({placeholders}) ORDER BY rowid"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter().map(|id| id.0)), |row| {
            Ok((
                IdentityId(row.get(0)?),
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (identity_id, image_path, pose_blob) = row?;
            out.push(CandidateFrame {
                identity_id,
                image_path,
                pose: self.decode_pose(&pose_blob)?,
            });
        }
        Ok(out)
    }

    /// Full frame records, landmarks included, for one identity.
    pub fn frames_for_identity(&self, id: IdentityId) -> Result<Vec<Frame>, CatalogError> {
        let mut stmt = self.conn.prepare(
            "SELECT image_path, pose, landmarks FROM frames WHERE identity_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![id.0], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (image_path, pose_blob, landmark_blob) = row?;
            out.push(Frame {
                identity_id: id,
                image_path,
                pose: self.decode_pose(&pose_blob)?,
                landmarks: Landmarks(self.codec.decode_vector(&landmark_blob)?),
            });
        }
        Ok(out)
    }

    pub fn identity_count(&self) -> Result<u64, CatalogError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn frame_count(&self) -> Result<u64, CatalogError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM frames", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn stats(&self) -> Result<CatalogStats, CatalogError> {
        Ok(CatalogStats {
            identities: self.identity_count()?,
            frames: self.frame_count()?,
        })
    }

    fn decode_pose(&self, blob: &[u8]) -> Result<Pose, CatalogError> {
        let values = self.codec.decode_vector(blob)?;
        let angles: [f32; 3] = values
            .as_slice()
            .try_into()
            .map_err(|_| CatalogError::InvalidPose(values.len()))?;
        Ok(Pose(angles))
    }
}

/// A batch of catalog writes committed together.
pub struct CatalogTransaction<'a> {
    tx: Transaction<'a>,
    codec: &'a ArrayCodec,
}

impl CatalogTransaction<'_> {
    pub fn insert_identity(
        &self,
        id: IdentityId,
        embedding: &Embedding,
    ) -> Result<(), CatalogError> {
        insert_identity(&self.tx, self.codec, id, embedding)
    }

    pub fn insert_frame(
        &self,
        identity_id: IdentityId,
        image_path: &str,
        pose: &Pose,
        landmarks: &Landmarks,
    ) -> Result<(), CatalogError> {
        insert_frame(&self.tx, self.codec, identity_id, image_path, pose, landmarks)
    }

    pub fn commit(self) -> Result<(), CatalogError> {
        self.tx.commit()?;
        Ok(())
    }
}

fn insert_identity(
    conn: &Connection,
    codec: &ArrayCodec,
    id: IdentityId,
    embedding: &Embedding,
) -> Result<(), CatalogError> {
    let blob = codec.encode_vector(&embedding.values);
    conn.execute(
        "INSERT INTO identities (id, embedding) VALUES (?1, ?2)",
        params![id.0, blob],
    )
    .map_err(|e| match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => CatalogError::DuplicateIdentity(id),
        _ => CatalogError::Sqlite(e),
    })?;
    Ok(())
}

fn insert_frame(
    conn: &Connection,
    codec: &ArrayCodec,
    identity_id: IdentityId,
    image_path: &str,
    pose: &Pose,
    landmarks: &Landmarks,
) -> Result<(), CatalogError> {
    conn.execute(
        "INSERT INTO frames (identity_id, image_path, pose, landmarks) VALUES (?1, ?2, ?3, ?4)",
        params![
            identity_id.0,
            image_path,
            codec.encode_vector(pose.as_slice()),
            codec.encode_vector(&landmarks.0),
        ],
    )
    .map_err(|e| match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => CatalogError::UnknownIdentity(identity_id),
        _ => CatalogError::Sqlite(e),
    })?;
    Ok(())
}
