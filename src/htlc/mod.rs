//! Recognition of the two-branch COMIT HTLC script and classification of
//! transactions spending it.
//!
//! The locking script under watch:
//!
//! ```text
//! OP_IF
//!   OP_SHA256 <32-byte secret hash> OP_EQUALVERIFY
//!   OP_DUP OP_HASH160 <20-byte recipient pubkey hash> OP_EQUALVERIFY
//! OP_ELSE
//!   <timelock> OP_CHECKLOCKTIMEVERIFY OP_DROP
//!   OP_DUP OP_HASH160 <20-byte sender pubkey hash> OP_EQUALVERIFY
//! OP_ENDIF
//! OP_CHECKSIG
//! ```

use bitcoin::hashes::{Hash as _, sha256};
use bitcoin::opcodes::Opcode;
use bitcoin::opcodes::all as opcodes;
use bitcoin::script::{Builder, Instruction, Instructions, Script, ScriptBuf};

use crate::chain::ChainInput;

/// Locktime pushes are CScriptNums of at most 5 bytes.
const MAX_TIMELOCK_PUSH_LEN: usize = 5;

/// Fields extracted from a matching HTLC locking script. All four are
/// present and correctly sized or the match fails entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HtlcParams {
    /// SHA256 hash the redeem preimage must resolve to.
    pub secret_hash: [u8; 32],
    /// HASH160 of the recipient's public key (redeem branch).
    pub recipient_pubkey_hash: [u8; 20],
    /// HASH160 of the sender's public key (refund branch).
    pub sender_pubkey_hash: [u8; 20],
    /// Raw consensus locktime after which the refund branch is valid.
    pub timelock: u32,
}

impl HtlcParams {
    /// Rebuild the locking script these parameters were extracted from.
    pub fn locking_script(&self) -> ScriptBuf {
        Builder::new()
            .push_opcode(opcodes::OP_IF)
            .push_opcode(opcodes::OP_SHA256)
            .push_slice(self.secret_hash)
            .push_opcode(opcodes::OP_EQUALVERIFY)
            .push_opcode(opcodes::OP_DUP)
            .push_opcode(opcodes::OP_HASH160)
            .push_slice(self.recipient_pubkey_hash)
            .push_opcode(opcodes::OP_EQUALVERIFY)
            .push_opcode(opcodes::OP_ELSE)
            .push_int(self.timelock as i64)
            .push_opcode(opcodes::OP_CLTV)
            .push_opcode(opcodes::OP_DROP)
            .push_opcode(opcodes::OP_DUP)
            .push_opcode(opcodes::OP_HASH160)
            .push_slice(self.sender_pubkey_hash)
            .push_opcode(opcodes::OP_EQUALVERIFY)
            .push_opcode(opcodes::OP_ENDIF)
            .push_opcode(opcodes::OP_CHECKSIG)
            .into_script()
    }
}

/// How a known lock output was spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendKind {
    /// Preimage branch: the spend reveals the secret.
    Redeem,
    /// Timelock branch: funds return to the sender.
    Refund,
}

impl SpendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpendKind::Redeem => "redeem",
            SpendKind::Refund => "refund",
        }
    }
}

/// Known HTLC script dialects. Further dialects extend this enum; the
/// lifecycle engine dispatches over it and stays unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptTemplate {
    ComitHtlcV1,
}

impl ScriptTemplate {
    /// Match a raw locking script against this template. Total over
    /// arbitrary bytes; malformed scripts are non-matches, never errors.
    pub fn match_output(&self, script: &Script) -> Option<HtlcParams> {
        match self {
            ScriptTemplate::ComitHtlcV1 => match_comit_htlc(script),
        }
    }

    /// Classify a spend of a known lock output.
    ///
    /// `None` means the observation cannot be classified (the provider
    /// returned neither witness nor scriptsig data); the swap stays open
    /// pending a better-formed observation.
    pub fn classify_spend(&self, input: &ChainInput, secret_hash: &[u8; 32]) -> Option<SpendKind> {
        match self {
            ScriptTemplate::ComitHtlcV1 => classify_comit_spend(input, secret_hash),
        }
    }
}

/// Cursor over a script's instruction stream. Every step yields `None` on
/// opcode mismatch, wrong push length, or a malformed/truncated stream,
/// which callers propagate with `?` into an overall non-match.
struct Walker<'a> {
    iter: Instructions<'a>,
}

impl<'a> Walker<'a> {
    fn new(script: &'a Script) -> Self {
        Self {
            iter: script.instructions_minimal(),
        }
    }

    fn next(&mut self) -> Option<Instruction<'a>> {
        self.iter.next()?.ok()
    }

    fn op(&mut self, expected: Opcode) -> Option<()> {
        match self.next()? {
            Instruction::Op(op) if op == expected => Some(()),
            _ => None,
        }
    }

    fn push<const N: usize>(&mut self) -> Option<[u8; N]> {
        match self.next()? {
            Instruction::PushBytes(bytes) if bytes.len() == N => {
                let mut out = [0u8; N];
                out.copy_from_slice(bytes.as_bytes());
                Some(out)
            }
            _ => None,
        }
    }

    /// A CScriptNum push, including the OP_1..OP_16 and OP_1NEGATE forms.
    fn script_num(&mut self) -> Option<i64> {
        match self.next()? {
            Instruction::PushBytes(bytes) => decode_script_num(bytes.as_bytes()),
            Instruction::Op(op) => {
                if op == opcodes::OP_PUSHNUM_NEG1 {
                    return Some(-1);
                }
                let code = op.to_u8();
                let one = opcodes::OP_PUSHNUM_1.to_u8();
                let sixteen = opcodes::OP_PUSHNUM_16.to_u8();
                if (one..=sixteen).contains(&code) {
                    return Some((code - one + 1) as i64);
                }
                None
            }
        }
    }

    fn done(mut self) -> Option<()> {
        match self.iter.next() {
            None => Some(()),
            Some(_) => None,
        }
    }
}

fn decode_script_num(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() {
        return Some(0);
    }
    if bytes.len() > MAX_TIMELOCK_PUSH_LEN {
        return None;
    }

    let negative = bytes.last().is_some_and(|b| b & 0x80 != 0);

    let mut value: i64 = 0;
    for (i, b) in bytes.iter().enumerate() {
        let b = if i == bytes.len() - 1 { b & 0x7f } else { *b };
        value |= (b as i64) << (8 * i);
    }

    Some(if negative { -value } else { value })
}

fn match_comit_htlc(script: &Script) -> Option<HtlcParams> {
    let mut w = Walker::new(script);

    w.op(opcodes::OP_IF)?;
    w.op(opcodes::OP_SHA256)?;
    let secret_hash = w.push::<32>()?;
    w.op(opcodes::OP_EQUALVERIFY)?;
    w.op(opcodes::OP_DUP)?;
    w.op(opcodes::OP_HASH160)?;
    let recipient_pubkey_hash = w.push::<20>()?;
    w.op(opcodes::OP_EQUALVERIFY)?;

    w.op(opcodes::OP_ELSE)?;
    let timelock = w.script_num()?;
    w.op(opcodes::OP_CLTV)?;
    w.op(opcodes::OP_DROP)?;
    w.op(opcodes::OP_DUP)?;
    w.op(opcodes::OP_HASH160)?;
    let sender_pubkey_hash = w.push::<20>()?;
    w.op(opcodes::OP_EQUALVERIFY)?;

    w.op(opcodes::OP_ENDIF)?;
    w.op(opcodes::OP_CHECKSIG)?;
    w.done()?;

    let timelock = u32::try_from(timelock).ok()?;

    Some(HtlcParams {
        secret_hash,
        recipient_pubkey_hash,
        sender_pubkey_hash,
        timelock,
    })
}

fn classify_comit_spend(input: &ChainInput, secret_hash: &[u8; 32]) -> Option<SpendKind> {
    let items: Vec<&[u8]> = if !input.witness.is_empty() {
        input.witness.iter().map(Vec::as_slice).collect()
    } else if !input.script_sig.is_empty() {
        script_sig_pushes(&input.script_sig)
    } else {
        return None;
    };

    if items.is_empty() {
        return None;
    }

    let reveals_secret = items
        .iter()
        .any(|item| item.len() == 32 && sha256::Hash::hash(item).to_byte_array() == *secret_hash);

    if reveals_secret {
        Some(SpendKind::Redeem)
    } else {
        Some(SpendKind::Refund)
    }
}

fn script_sig_pushes(script_sig: &Script) -> Vec<&[u8]> {
    script_sig
        .instructions()
        .filter_map(|ins| match ins {
            Ok(Instruction::PushBytes(bytes)) => Some(bytes.as_bytes()),
            _ => None,
        })
        .collect()
}
