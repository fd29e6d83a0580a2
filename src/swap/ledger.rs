use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context as _, Result};
use rusqlite::{Connection, OptionalExtension as _, Row, params};

use super::{EventTag, LockObservation, SwapRecord, SwapState};
use crate::error::WatchError;
use crate::htlc::SpendKind;

/// Durable store of swap records keyed by lock transaction id.
///
/// Every multi-step write runs inside a SQLite transaction, so readers
/// never observe a half-updated swap. Callers serialize access through a
/// mutex; WAL mode keeps the database safe across restarts mid-write.
#[derive(Debug)]
pub struct SwapLedger {
    conn: Connection,
    path: PathBuf,
}

impl SwapLedger {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create ledger dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a newly observed lock. Idempotent by `lock_txid`: a swap
    /// already present is returned unchanged with `is_new = false`.
    pub fn upsert_lock(
        &mut self,
        obs: &LockObservation,
    ) -> std::result::Result<(SwapRecord, bool), WatchError> {
        let tx = self.conn.transaction()?;

        if let Some(existing) = get_swap(&tx, &obs.lock_txid)? {
            tx.commit()?;
            return Ok((existing, false));
        }

        let now = unix_now();
        let (xmr_amount, btc_xmr_rate, rate_source) = match &obs.conversion {
            Some(c) => (
                Some(c.xmr_amount),
                Some(c.rate.xmr_per_btc),
                Some(c.rate.source.to_string()),
            ),
            None => (None, None, None),
        };

        tx.execute(
            r#"
INSERT INTO swaps (
  lock_txid,
  lock_vout,
  state,
  btc_amount_sats,
  xmr_amount,
  btc_xmr_rate,
  rate_source,
  secret_hash,
  recipient_pubkey_hash,
  sender_pubkey_hash,
  timelock,
  detected_at,
  last_updated_at
) VALUES (
  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13
)
"#,
            params![
                &obs.lock_txid,
                obs.lock_vout,
                state_to_str(SwapState::Locked),
                i64::try_from(obs.btc_amount.to_sat()).map_err(|_| {
                    rusqlite::Error::ToSqlConversionFailure(
                        format!("btc amount out of range: {}", obs.btc_amount).into(),
                    )
                })?,
                xmr_amount,
                btc_xmr_rate,
                rate_source,
                hex::encode(obs.params.secret_hash),
                hex::encode(obs.params.recipient_pubkey_hash),
                hex::encode(obs.params.sender_pubkey_hash),
                obs.params.timelock,
                now,
                now,
            ],
        )?;

        let swap = get_swap(&tx, &obs.lock_txid)?
            .ok_or_else(|| WatchError::SwapNotFound(obs.lock_txid.clone()))?;
        tx.commit()?;

        Ok((swap, true))
    }

    /// Record a spend of a known lock output. Idempotent per `spend_txid`;
    /// a classification that contradicts an already resolved swap is a
    /// `ConflictingTransition` and leaves the record untouched. Returns
    /// the swap and whether a state transition happened.
    pub fn record_spend(
        &mut self,
        lock_txid: &str,
        spend_txid: &str,
        kind: SpendKind,
    ) -> std::result::Result<(SwapRecord, bool), WatchError> {
        let tx = self.conn.transaction()?;

        let swap = get_swap(&tx, lock_txid)?
            .ok_or_else(|| WatchError::SwapNotFound(lock_txid.to_string()))?;

        let recorded = match kind {
            SpendKind::Redeem => swap.redeem_txid.as_deref(),
            SpendKind::Refund => swap.refund_txid.as_deref(),
        };
        if recorded == Some(spend_txid) {
            tx.commit()?;
            return Ok((swap, false));
        }

        if swap.state.is_terminal() {
            return Err(WatchError::ConflictingTransition {
                lock_txid: lock_txid.to_string(),
                existing: state_to_str(swap.state).to_string(),
                proposed: kind.as_str().to_string(),
            });
        }

        let (column, state) = match kind {
            SpendKind::Redeem => ("redeem_txid", SwapState::Redeemed),
            SpendKind::Refund => ("refund_txid", SwapState::Refunded),
        };
        tx.execute(
            &format!(
                "UPDATE swaps SET {column} = ?2, state = ?3, last_updated_at = ?4 WHERE lock_txid = ?1"
            ),
            params![lock_txid, spend_txid, state_to_str(state), unix_now()],
        )?;

        let swap = get_swap(&tx, lock_txid)?
            .ok_or_else(|| WatchError::SwapNotFound(lock_txid.to_string()))?;
        tx.commit()?;

        Ok((swap, true))
    }

    /// Passive `Locked → Expired` transition. A no-op for swaps already
    /// terminal.
    pub fn mark_expired(
        &mut self,
        lock_txid: &str,
    ) -> std::result::Result<(SwapRecord, bool), WatchError> {
        let tx = self.conn.transaction()?;

        let swap = get_swap(&tx, lock_txid)?
            .ok_or_else(|| WatchError::SwapNotFound(lock_txid.to_string()))?;
        if swap.state.is_terminal() {
            tx.commit()?;
            return Ok((swap, false));
        }

        tx.execute(
            "UPDATE swaps SET state = ?2, last_updated_at = ?3 WHERE lock_txid = ?1",
            params![
                lock_txid,
                state_to_str(SwapState::Expired),
                unix_now()
            ],
        )?;

        let swap = get_swap(&tx, lock_txid)?
            .ok_or_else(|| WatchError::SwapNotFound(lock_txid.to_string()))?;
        tx.commit()?;

        Ok((swap, true))
    }

    /// Remember that `tag` was delivered for this swap.
    pub fn mark_notified(
        &mut self,
        lock_txid: &str,
        tag: EventTag,
    ) -> std::result::Result<(), WatchError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO notifications (lock_txid, event_tag, sent_at) VALUES (?1, ?2, ?3)",
            params![lock_txid, tag.as_str(), unix_now()],
        )?;
        Ok(())
    }

    /// Idempotence check consulted before dispatching `tag`.
    pub fn was_notified(
        &self,
        lock_txid: &str,
        tag: EventTag,
    ) -> std::result::Result<bool, WatchError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM notifications WHERE lock_txid = ?1 AND event_tag = ?2",
                params![lock_txid, tag.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get(&self, lock_txid: &str) -> std::result::Result<Option<SwapRecord>, WatchError> {
        Ok(get_swap(&self.conn, lock_txid)?)
    }

    /// Swaps still in `Locked`, whose lock outputs remain under watch.
    pub fn open_swaps(&self) -> std::result::Result<Vec<SwapRecord>, WatchError> {
        self.query_swaps(
            &format!("{SELECT_SWAP} WHERE state = ?1 ORDER BY detected_at"),
            params![state_to_str(SwapState::Locked)],
        )
    }

    pub fn recent_swaps(&self, limit: u32) -> std::result::Result<Vec<SwapRecord>, WatchError> {
        self.query_swaps(
            &format!("{SELECT_SWAP} ORDER BY detected_at DESC, lock_txid LIMIT ?1"),
            params![limit],
        )
    }

    /// Swaps with a lifecycle event not yet acknowledged by the notifier:
    /// the detection event, plus the terminal event once resolved.
    pub fn pending_notifications(
        &self,
    ) -> std::result::Result<Vec<(SwapRecord, EventTag)>, WatchError> {
        let swaps = self.query_swaps(&format!("{SELECT_SWAP} ORDER BY detected_at"), params![])?;

        let mut pending = Vec::new();
        for swap in swaps {
            let mut tags = vec![EventTag::Detected];
            if swap.state.is_terminal() {
                tags.push(swap.state.event_tag());
            }
            for tag in tags {
                if !self.was_notified(&swap.lock_txid, tag)? {
                    pending.push((swap.clone(), tag));
                }
            }
        }
        Ok(pending)
    }

    fn query_swaps(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> std::result::Result<Vec<SwapRecord>, WatchError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, row_to_swap)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

const SELECT_SWAP: &str = r#"
SELECT
  lock_txid,
  lock_vout,
  redeem_txid,
  refund_txid,
  state,
  btc_amount_sats,
  xmr_amount,
  btc_xmr_rate,
  rate_source,
  secret_hash,
  recipient_pubkey_hash,
  sender_pubkey_hash,
  timelock,
  detected_at,
  last_updated_at
FROM swaps
"#;

fn get_swap(conn: &Connection, lock_txid: &str) -> rusqlite::Result<Option<SwapRecord>> {
    conn.query_row(
        &format!("{SELECT_SWAP} WHERE lock_txid = ?1"),
        params![lock_txid],
        row_to_swap,
    )
    .optional()
}

fn row_to_swap(row: &Row<'_>) -> rusqlite::Result<SwapRecord> {
    let state_str: String = row.get(4)?;
    let btc_amount_sats: i64 = row.get(5)?;
    let lock_vout: i64 = row.get(1)?;
    let timelock: i64 = row.get(12)?;

    Ok(SwapRecord {
        lock_txid: row.get(0)?,
        lock_vout: u32::try_from(lock_vout).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Integer,
                format!("invalid lock_vout {lock_vout}").into(),
            )
        })?,
        redeem_txid: row.get(2)?,
        refund_txid: row.get(3)?,
        state: state_from_str(&state_str, 4)?,
        btc_amount_sats: u64::try_from(btc_amount_sats).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Integer,
                format!("invalid btc_amount_sats {btc_amount_sats}").into(),
            )
        })?,
        xmr_amount: row.get(6)?,
        btc_xmr_rate: row.get(7)?,
        rate_source: row.get(8)?,
        secret_hash: row.get(9)?,
        recipient_pubkey_hash: row.get(10)?,
        sender_pubkey_hash: row.get(11)?,
        timelock: u32::try_from(timelock).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                12,
                rusqlite::types::Type::Integer,
                format!("invalid timelock {timelock}").into(),
            )
        })?,
        detected_at: row.get(13)?,
        last_updated_at: row.get(14)?,
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS swaps (
  lock_txid TEXT PRIMARY KEY,
  lock_vout INTEGER NOT NULL,
  redeem_txid TEXT,
  refund_txid TEXT,
  state TEXT NOT NULL,
  btc_amount_sats INTEGER NOT NULL,
  xmr_amount REAL,
  btc_xmr_rate REAL,
  rate_source TEXT,
  secret_hash TEXT NOT NULL,
  recipient_pubkey_hash TEXT NOT NULL,
  sender_pubkey_hash TEXT NOT NULL,
  timelock INTEGER NOT NULL,
  detected_at INTEGER NOT NULL,
  last_updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS swaps_state_idx ON swaps(state);
CREATE INDEX IF NOT EXISTS swaps_detected_at_idx ON swaps(detected_at);

CREATE TABLE IF NOT EXISTS notifications (
  lock_txid TEXT NOT NULL,
  event_tag TEXT NOT NULL,
  sent_at INTEGER NOT NULL,
  PRIMARY KEY (lock_txid, event_tag)
);
"#,
    )
    .context("create tables")?;
    Ok(())
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn state_to_str(state: SwapState) -> &'static str {
    match state {
        SwapState::Locked => "locked",
        SwapState::Redeemed => "redeemed",
        SwapState::Refunded => "refunded",
        SwapState::Expired => "expired",
    }
}

fn state_from_str(s: &str, col: usize) -> rusqlite::Result<SwapState> {
    match s {
        "locked" => Ok(SwapState::Locked),
        "redeemed" => Ok(SwapState::Redeemed),
        "refunded" => Ok(SwapState::Refunded),
        "expired" => Ok(SwapState::Expired),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            format!("unknown swap state: {other}").into(),
        )),
    }
}
