use std::str::FromStr;

use alloy::primitives::{keccak256, Address, Bytes, B256};
use k256::ecdsa::VerifyingKey;
use k256::PublicKey;
use tracing::{debug, info, warn};

use crate::codec::abi::{decode_value_array, encode_get_states, encode_set_states};
use crate::codec::envelope::SignedEnvelope;
use crate::codec::CodecError;
use crate::crypto::encryption::{self, EncryptionError};
use crate::crypto::signature::{public_key_to_address, SignatureError};
use crate::domain::function::{AccessSide, BindingError, StateLocation};
use crate::domain::message::{outbox_key, AgentMessage};
use crate::domain::policy::{PolicyError, PolicyRecord, StateOwner};
use crate::domain::proof::{build_proof, ProofError};
use crate::domain::submission::Submission;
use crate::domain::transaction::{ConfidentialTransaction, Status, TransitionError};
use crate::ports::agent::{AgentChannel, ChannelError};
use crate::ports::engine::{EngineError, ExecutionEngine, ExecutionRequest};
use crate::ports::ledger::{Ledger, LedgerError, LedgerTx, LedgerTxExt, Table};
use crate::registry::{self, RegistryError};
use crate::tee::{TeeAccount, TeeError, TeeKeystore, TEE_ACCOUNT_KEY};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("signature error: {0}")]
    Signature(#[from] SignatureError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("binding error: {0}")]
    Binding(#[from] BindingError),

    #[error("proof error: {0}")]
    Proof(#[from] ProofError),

    #[error("transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("execution error: {0}")]
    Engine(#[from] EngineError),

    #[error("agent channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("TEE error: {0}")]
    Tee(#[from] TeeError),

    #[error("transaction {0} is {1}, not PENDING")]
    NotPending(B256, Status),

    #[error("nonce too low: ledger has {ledger}, submission declared {declared}")]
    NonceTooLow { ledger: u64, declared: u64 },

    #[error("nonce of {0} cannot advance past u64::MAX")]
    NonceOverflow(Address),

    #[error("function of transaction {0} still has unbound inputs")]
    FunctionIncomplete(B256),

    #[error("no transaction with digest {0}")]
    TransactionNotFound(B256),

    #[error("transaction {digest} is {actual}, expected {expected}")]
    UnexpectedStatus {
        digest: B256,
        expected: Status,
        actual: Status,
    },

    #[error("submission calls {got}, transaction calls {expected}")]
    FunctionMismatch { expected: String, got: String },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("public key does not belong to {0}")]
    PublicKeyMismatch(Address),

    #[error("no public key known for {0}")]
    MissingPublicKey(Address),
}

/// Result of accepting a party submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub digest: B256,
    pub status: Status,
}

/// Drives confidential transactions through their lifecycle.
///
/// Every entry point opens one ledger transaction, loads what it needs,
/// applies pure transitions and writes the result back. Outbound messages are
/// written to the outbox table in the same ledger transaction and handed to
/// the agent only after commit; if delivery fails the state is still
/// committed and `redeliver` replays the outbox.
///
/// Generic over `Ledger` (persistence), `ExecutionEngine` (contract
/// execution) and `AgentChannel` (off-chain relay).
pub struct Orchestrator<L: Ledger, E: ExecutionEngine, A: AgentChannel> {
    ledger: L,
    engine: E,
    agent: A,
    keystore: TeeKeystore,
}

impl<L: Ledger, E: ExecutionEngine, A: AgentChannel> Orchestrator<L, E, A> {
    pub fn new(ledger: L, engine: E, agent: A, keystore: TeeKeystore) -> Self {
        Self {
            ledger,
            engine,
            agent,
            keystore,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    pub fn tee_address(&self) -> Address {
        self.keystore.address()
    }

    /// Public key state owners seal their values to.
    pub fn tee_public_key(&self) -> PublicKey {
        self.keystore.public_key()
    }

    // ── Entry points ────────────────────────────────────────────────────────

    /// Register the confidentiality policy carried by a signed envelope.
    /// The signer is recorded as the registrant.
    pub async fn register_policy(&self, raw: &[u8]) -> Result<B256, OrchestratorError> {
        let envelope = SignedEnvelope::decode_raw(raw)?;
        let registrant = envelope.sender()?;
        let (contract, registration) = envelope.policy_registration()?;

        let record = PolicyRecord {
            contract,
            registrant,
            verifier: registration.verifier,
            service: registration.service,
            code_hash: registration.code_hash,
            document: registration.document,
        };
        check_document(&record)?;

        let mut tx = self.ledger.begin();
        let digest = registry::register(&mut tx, &record).inspect_err(|e| {
            warn!("policy registration for {contract} rejected: {e}");
        })?;
        tx.commit()?;

        info!("registered policy {digest} for {contract} (registrant {registrant})");
        Ok(digest)
    }

    /// Accept a signed party submission.
    ///
    /// Opening submissions create a `PENDING` transaction keyed by the
    /// envelope's signing hash; joining submissions bind arguments on an
    /// existing one. Once every input is bound the transaction moves to
    /// `REQUESTING_OLD_STATES` and the agent is asked for the current states.
    pub async fn submit(&self, raw: &[u8]) -> Result<SubmitOutcome, OrchestratorError> {
        let envelope = SignedEnvelope::decode_raw(raw)?;
        let sender = envelope.sender()?;
        let submission = envelope.submission()?;

        let digest = match &submission {
            Submission::Open { .. } => envelope.signing_hash(),
            Submission::Join { target, .. } => *target,
        };

        let mut tx = self.ledger.begin();
        let mut outbox = Vec::new();

        let existing: Option<ConfidentialTransaction> =
            tx.get_json(Table::Transactions, digest.as_slice())?;

        let cpt = match (existing, submission) {
            (Some(cpt), submission) => {
                if cpt.status != Status::Pending {
                    warn!("submission from {sender} for {digest} rejected: {}", cpt.status);
                    return Err(OrchestratorError::NotPending(digest, cpt.status));
                }
                let call = submission.call();
                if call.function != cpt.function.name {
                    return Err(OrchestratorError::FunctionMismatch {
                        expected: cpt.function.name.clone(),
                        got: call.function.clone(),
                    });
                }
                cpt.merge_inputs(sender, &call.inputs)?
            }
            (None, Submission::Join { target, .. }) => {
                return Err(OrchestratorError::TransactionNotFound(target));
            }
            (None, Submission::Open {
                contract,
                nonce,
                call,
            }) => {
                let (policy_digest, policy) = registry::lookup(&mut tx, contract)?;

                let ledger_nonce: u64 = tx
                    .get_json(Table::AccountNonces, sender.as_slice())?
                    .unwrap_or(0);
                if ledger_nonce > nonce {
                    warn!("submission from {sender} rejected: nonce {nonce} < {ledger_nonce}");
                    return Err(OrchestratorError::NonceTooLow {
                        ledger: ledger_nonce,
                        declared: nonce,
                    });
                }
                let next = nonce
                    .checked_add(1)
                    .ok_or(OrchestratorError::NonceOverflow(sender))?;
                tx.put_json(Table::AccountNonces, sender.as_slice(), &next)?;

                let binding = policy.document.function(&call.function)?;
                tx.put_json(Table::ContractDigests, contract.as_slice(), &digest)?;
                info!("opened {digest}: {sender} calls {}.{}", contract, call.function);

                ConfidentialTransaction::new(digest, sender, &policy, policy_digest, binding)
                    .merge_inputs(sender, &call.inputs)?
            }
        };

        let cpt = if cpt.function.is_complete() {
            // Key-owned slots must resolve to addresses before the agent is asked
            let policy = load_policy(&mut tx, &cpt)?;
            required_owners(&policy, &cpt).inspect_err(|e| {
                warn!("submission from {sender} for {digest} rejected: {e}");
            })?;
            self.request_old_states(cpt, &mut tx, &mut outbox)?
        } else {
            debug!(
                "{digest} waiting for inputs: {:?}",
                cpt.function.unbound_inputs()
            );
            cpt
        };

        let status = cpt.status;
        tx.put_json(Table::Transactions, digest.as_slice(), &cpt)?;
        tx.commit()?;

        self.deliver(&outbox).await?;
        Ok(SubmitOutcome { digest, status })
    }

    /// Handle the verifier's current (sealed) states for `digest`.
    ///
    /// Values line up with the function's read locations. If a state owner's
    /// public key is not yet cached the transaction waits for keys; otherwise
    /// it executes and submits straight away.
    pub async fn on_old_states_received(
        &self,
        digest: B256,
        encoded_states: &[u8],
    ) -> Result<Status, OrchestratorError> {
        let mut tx = self.ledger.begin();
        let mut outbox = Vec::new();

        let mut cpt = load_transaction(&mut tx, digest)?;
        if !cpt.function.is_complete() {
            warn!("old states for {digest} rejected: function incomplete");
            return Err(OrchestratorError::FunctionIncomplete(digest));
        }
        expect_status(&cpt, Status::RequestingOldStates)?;

        let states = decode_value_array(encoded_states)?;
        let read = cpt.function.state_locations(AccessSide::Read, cpt.from)?;
        if states.len() != read.len() {
            return Err(OrchestratorError::MalformedPayload(format!(
                "expected {} old states, got {}",
                read.len(),
                states.len()
            )));
        }
        debug!("{digest}: received {} old states", states.len());

        tx.put_json(
            Table::StatesDigests,
            digest.as_slice(),
            &keccak256(encoded_states),
        )?;
        cpt.old_states = states;

        let policy = load_policy(&mut tx, &cpt)?;
        let mut missing = Vec::new();
        for owner in required_owners(&policy, &cpt)? {
            let cached: Option<Bytes> = tx.get_json(Table::PublicKeys, owner.as_slice())?;
            match cached {
                Some(key) => {
                    cpt.public_keys.insert(owner, key);
                }
                None => missing.push(owner),
            }
        }

        let cpt = if missing.is_empty() {
            self.execute_and_submit(cpt, &policy, &mut tx, &mut outbox)
                .await?
        } else {
            cpt.requested_addresses = missing.clone();
            let cpt = cpt.with_status(Status::RequestingPublicKeys)?;
            info!("{digest}: requesting {} public keys", missing.len());
            enqueue(
                &mut tx,
                &mut outbox,
                AgentMessage::RequestPublicKeys {
                    digest,
                    addresses: missing,
                },
            )?;
            cpt
        };

        let status = cpt.status;
        tx.put_json(Table::Transactions, digest.as_slice(), &cpt)?;
        tx.commit()?;

        self.deliver(&outbox).await?;
        Ok(status)
    }

    /// Handle the public keys requested for `digest`, in request order.
    /// Each key must derive to the address it was requested for.
    pub async fn on_public_keys_received(
        &self,
        digest: B256,
        encoded_keys: &[u8],
    ) -> Result<Status, OrchestratorError> {
        let mut tx = self.ledger.begin();
        let mut outbox = Vec::new();

        let mut cpt = load_transaction(&mut tx, digest)?;
        expect_status(&cpt, Status::RequestingPublicKeys)?;

        let keys = decode_value_array(encoded_keys)?;
        if keys.len() != cpt.requested_addresses.len() {
            return Err(OrchestratorError::MalformedPayload(format!(
                "requested {} public keys, got {}",
                cpt.requested_addresses.len(),
                keys.len()
            )));
        }

        for (address, key) in cpt.requested_addresses.clone().into_iter().zip(keys) {
            let public = parse_public_key(&key)?;
            if public_key_to_address(&VerifyingKey::from(&public)) != address {
                warn!("public key for {address} rejected: derives to another address");
                return Err(OrchestratorError::PublicKeyMismatch(address));
            }
            tx.put_json(Table::PublicKeys, address.as_slice(), &key)?;
            cpt.public_keys.insert(address, key);
        }

        let policy = load_policy(&mut tx, &cpt)?;
        let cpt = self
            .execute_and_submit(cpt, &policy, &mut tx, &mut outbox)
            .await?;

        let status = cpt.status;
        tx.put_json(Table::Transactions, digest.as_slice(), &cpt)?;
        tx.commit()?;

        self.deliver(&outbox).await?;
        Ok(status)
    }

    /// Apply the agent's confirmation report. `"SYNCED"` is success, anything
    /// else a failure. Reports for terminal transactions are acknowledged
    /// without effect.
    pub async fn on_finality_report(
        &self,
        digest: B256,
        outcome: &str,
    ) -> Result<Status, OrchestratorError> {
        let mut tx = self.ledger.begin();
        let cpt = load_transaction(&mut tx, digest)?;
        let current = cpt.status;

        match cpt.finalize(outcome)? {
            None => {
                debug!("{digest}: duplicate report {outcome} ignored, already {current}");
                Ok(current)
            }
            Some(cpt) => {
                tx.put_json(Table::Transactions, digest.as_slice(), &cpt)?;
                tx.commit()?;
                info!("{digest}: {current} -> {}", cpt.status);
                Ok(cpt.status)
            }
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    pub fn transaction(
        &self,
        digest: B256,
    ) -> Result<Option<ConfidentialTransaction>, OrchestratorError> {
        let mut tx = self.ledger.begin();
        Ok(tx.get_json(Table::Transactions, digest.as_slice())?)
    }

    /// Latest transaction opened against `contract`.
    pub fn latest_digest(&self, contract: Address) -> Result<Option<B256>, OrchestratorError> {
        let mut tx = self.ledger.begin();
        Ok(tx.get_json(Table::ContractDigests, contract.as_slice())?)
    }

    pub fn tee_account(&self) -> Result<TeeAccount, OrchestratorError> {
        let mut tx = self.ledger.begin();
        self.load_tee_account(&mut tx)
    }

    /// Messages recorded for `digest`, in stage order.
    pub fn outbox(&self, digest: B256) -> Result<Vec<AgentMessage>, OrchestratorError> {
        let mut tx = self.ledger.begin();
        let mut messages = Vec::new();
        for stage in 0..=2u8 {
            let entry: Option<AgentMessage> =
                tx.get_json(Table::Outbox, &outbox_key(digest, stage))?;
            messages.extend(entry);
        }
        Ok(messages)
    }

    /// Hand every outbox message of `digest` to the agent again.
    pub async fn redeliver(&self, digest: B256) -> Result<usize, OrchestratorError> {
        let messages = self.outbox(digest)?;
        self.deliver(&messages).await?;
        Ok(messages.len())
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn request_old_states(
        &self,
        cpt: ConfidentialTransaction,
        tx: &mut L::Tx,
        outbox: &mut Vec<AgentMessage>,
    ) -> Result<ConfidentialTransaction, OrchestratorError> {
        let read = cpt.function.state_locations(AccessSide::Read, cpt.from)?;
        let cpt = cpt.with_status(Status::RequestingOldStates)?;
        info!("{}: all inputs bound, requesting {} old states", cpt.digest, read.len());

        enqueue(
            tx,
            outbox,
            AgentMessage::RequestOldStates {
                digest: cpt.digest,
                tee: self.keystore.address(),
                verifier: cpt.verifier,
                call_data: encode_get_states(&read),
            },
        )?;
        Ok(cpt)
    }

    /// Decrypt old states, execute, seal the new states, and emit the signed
    /// `set_states` call. The TEE nonce is consumed in the caller's ledger
    /// transaction, so an aborted attempt consumes none.
    async fn execute_and_submit(
        &self,
        cpt: ConfidentialTransaction,
        policy: &PolicyRecord,
        tx: &mut L::Tx,
        outbox: &mut Vec<AgentMessage>,
    ) -> Result<ConfidentialTransaction, OrchestratorError> {
        let digest = cpt.digest;
        let secret = self.keystore.secret_key();

        // Read before executing so concurrent attempts conflict on the nonce
        let mut account = self.load_tee_account(tx)?;

        // ── Step 1: open old states ──
        let read = cpt.function.state_locations(AccessSide::Read, cpt.from)?;
        let mut plaintext = Vec::with_capacity(read.len());
        for (location, sealed) in read.iter().zip(&cpt.old_states) {
            if sealed.is_empty() {
                plaintext.push(Bytes::new());
                continue;
            }
            let value = match self.owner_key(policy, &cpt, location)? {
                Some(peer) => Bytes::from(encryption::open(secret, &peer, sealed)?),
                None => sealed.clone(),
            };
            plaintext.push(value);
        }

        // ── Step 2: execute ──
        let request = ExecutionRequest {
            contract: cpt.to,
            tee: self.keystore.address(),
            requester: cpt.from,
            function: cpt.function.clone(),
            old_states: plaintext,
        };
        let output = self.engine.execute(&request).await.inspect_err(|e| {
            warn!("{digest}: execution failed: {e}");
        })?;

        // ── Step 3: seal new states ──
        let new_states = decode_value_array(&output)?;
        let mutate = cpt.function.state_locations(AccessSide::Mutate, cpt.from)?;
        if new_states.len() != mutate.len() {
            return Err(OrchestratorError::MalformedPayload(format!(
                "engine returned {} new states for {} mutated locations",
                new_states.len(),
                mutate.len()
            )));
        }
        let mut sealed = Vec::with_capacity(new_states.len());
        for (location, value) in mutate.iter().zip(new_states) {
            let value = match self.owner_key(policy, &cpt, location)? {
                Some(peer) => Bytes::from(encryption::seal(secret, &peer, &value)?),
                None => value,
            };
            sealed.push(value);
        }

        // ── Step 4: proof and signed call ──
        let policy_digest = registry::digest_for(tx, cpt.to)?;
        let states_digest: Option<B256> = tx.get_json(Table::StatesDigests, digest.as_slice())?;
        let proof = build_proof(policy_digest, states_digest, cpt.code_hash)?;
        let data = encode_set_states(&read, sealed, &proof);

        let signed = self.keystore.sign_call(cpt.verifier, data, account.nonce)?;
        enqueue(
            tx,
            outbox,
            AgentMessage::SubmitSignedCall {
                digest,
                nonce: signed.nonce,
                payload: signed.raw,
            },
        )?;
        account.nonce += 1;
        tx.put_json(Table::TeeAccount, TEE_ACCOUNT_KEY, &account)?;

        let cpt = cpt.with_status(Status::Syncing)?;
        info!(
            "{digest}: signed set_states {} at nonce {}, now {}",
            signed.hash, signed.nonce, cpt.status
        );
        Ok(cpt)
    }

    /// Key a location's values are sealed to; `None` for plaintext slots.
    fn owner_key(
        &self,
        policy: &PolicyRecord,
        cpt: &ConfidentialTransaction,
        location: &StateLocation,
    ) -> Result<Option<PublicKey>, OrchestratorError> {
        let owner = match policy.document.state(&location.slot)?.owner {
            StateOwner::All => return Ok(None),
            StateOwner::Tee => return Ok(Some(self.keystore.public_key())),
            StateOwner::Sender => cpt.from,
            StateOwner::Key => key_owner(location)?,
        };
        let key = cpt
            .public_keys
            .get(&owner)
            .ok_or(OrchestratorError::MissingPublicKey(owner))?;
        Ok(Some(parse_public_key(key)?))
    }

    fn load_tee_account(&self, tx: &mut L::Tx) -> Result<TeeAccount, OrchestratorError> {
        let account: Option<TeeAccount> = tx.get_json(Table::TeeAccount, TEE_ACCOUNT_KEY)?;
        Ok(account.unwrap_or_else(|| TeeAccount::new(self.keystore.address())))
    }

    async fn deliver(&self, messages: &[AgentMessage]) -> Result<(), OrchestratorError> {
        for message in messages {
            self.agent.deliver(message).await.inspect_err(|e| {
                warn!(
                    "{}: delivery of stage {} failed, kept in outbox: {e}",
                    message.digest(),
                    message.stage()
                );
            })?;
        }
        Ok(())
    }
}

fn load_transaction<T: LedgerTx>(
    tx: &mut T,
    digest: B256,
) -> Result<ConfidentialTransaction, OrchestratorError> {
    tx.get_json(Table::Transactions, digest.as_slice())?
        .ok_or(OrchestratorError::TransactionNotFound(digest))
}

fn load_policy<T: LedgerTx>(
    tx: &mut T,
    cpt: &ConfidentialTransaction,
) -> Result<PolicyRecord, OrchestratorError> {
    registry::get_by_digest(tx, cpt.policy_digest)?
        .ok_or(RegistryError::DanglingDigest(cpt.policy_digest).into())
}

fn expect_status(cpt: &ConfidentialTransaction, expected: Status) -> Result<(), OrchestratorError> {
    if cpt.status != expected {
        warn!("{}: callback rejected, status is {}", cpt.digest, cpt.status);
        return Err(OrchestratorError::UnexpectedStatus {
            digest: cpt.digest,
            expected,
            actual: cpt.status,
        });
    }
    Ok(())
}

/// Record `message` in the outbox table and queue it for delivery after commit.
fn enqueue<T: LedgerTx>(
    tx: &mut T,
    outbox: &mut Vec<AgentMessage>,
    message: AgentMessage,
) -> Result<(), OrchestratorError> {
    tx.put_json(Table::Outbox, &message.outbox_key(), &message)?;
    outbox.push(message);
    Ok(())
}

/// Every function slot must be declared by the document's states.
fn check_document(record: &PolicyRecord) -> Result<(), PolicyError> {
    let document = &record.document;
    for function in &document.functions {
        for access in function.read.iter().chain(&function.mutate) {
            document.state(&access.name)?;
        }
    }
    Ok(())
}

/// Addresses whose public keys are needed to open and seal this transaction's
/// states, deduplicated in first-seen order.
fn required_owners(
    policy: &PolicyRecord,
    cpt: &ConfidentialTransaction,
) -> Result<Vec<Address>, OrchestratorError> {
    let mut owners = Vec::new();
    for side in [AccessSide::Read, AccessSide::Mutate] {
        for location in cpt.function.state_locations(side, cpt.from)? {
            let owner = match policy.document.state(&location.slot)?.owner {
                StateOwner::Tee | StateOwner::All => continue,
                StateOwner::Sender => cpt.from,
                StateOwner::Key => key_owner(&location)?,
            };
            if !owners.contains(&owner) {
                owners.push(owner);
            }
        }
    }
    Ok(owners)
}

fn key_owner(location: &StateLocation) -> Result<Address, OrchestratorError> {
    let key = location.key.as_deref().unwrap_or_default();
    Address::from_str(key).map_err(|_| {
        OrchestratorError::MalformedPayload(format!(
            "key {key:?} of {} is not an address",
            location.slot
        ))
    })
}

fn parse_public_key(key: &[u8]) -> Result<PublicKey, OrchestratorError> {
    PublicKey::from_sec1_bytes(key)
        .map_err(|_| OrchestratorError::MalformedPayload("invalid SEC1 public key".to_string()))
}
