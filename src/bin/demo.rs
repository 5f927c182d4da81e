//! Confidential transfer demo
//!
//! Runs a two-party `transfer` through the orchestrator in-process: policy
//! registration, the requester's opening submission, the recipient's joining
//! submission, the verifier's old states, the confidentiality service's
//! public keys, execution, and the confirmation report. The agent, engine and
//! ledger are the in-memory adapters; this binary plays the agent's role.
//!
//! Run with: `cargo run --bin demo -- [--config tee_mpt.toml]`

use std::path::PathBuf;

use alloy::primitives::{Address, Bytes, B256};
use anyhow::{bail, Context, Result};
use clap::Parser;
use k256::ecdsa::SigningKey;
use k256::{PublicKey, SecretKey};
use tracing::info;

use tee_mpt::adapters::memory_ledger::InMemoryLedger;
use tee_mpt::adapters::mock_engine::MockExecutionEngine;
use tee_mpt::adapters::recording_agent::RecordingAgent;
use tee_mpt::codec::abi::encode_value_array;
use tee_mpt::codec::envelope::SignedEnvelope;
use tee_mpt::config::OrchestratorConfig;
use tee_mpt::crypto::encryption::seal;
use tee_mpt::crypto::signature::public_key_to_address;
use tee_mpt::domain::message::AgentMessage;
use tee_mpt::domain::policy::PolicyDocument;
use tee_mpt::domain::submission::{FunctionCall, PolicyRegistration};
use tee_mpt::orchestrator::Orchestrator;
use tee_mpt::tee::TeeKeystore;

type DemoOrchestrator = Orchestrator<InMemoryLedger, MockExecutionEngine, RecordingAgent>;

const TOKEN: Address = Address::repeat_byte(0xAA);
const VERIFIER: Address = Address::repeat_byte(0x0F);
const SERVICE: Address = Address::repeat_byte(0x5E);

const TOKEN_POLICY: &str = r#"{
    "contract": "ConfidentialToken",
    "states": [
        { "name": "balances", "type": "mapping(address => uint256)", "owner": "key" },
        { "name": "total_transfers", "type": "uint256", "owner": "tee" }
    ],
    "functions": [{
        "name": "transfer",
        "type": "function",
        "inputs": [
            { "name": "to", "type": "address", "owner": "all" },
            { "name": "amount", "type": "uint256", "owner": "msg.sender" }
        ],
        "outputs": [],
        "read": [{ "name": "balances", "keys": ["msg.sender", "to"] }],
        "mutate": [
            { "name": "balances", "keys": ["msg.sender", "to"] },
            { "name": "total_transfers", "keys": [] }
        ]
    }]
}"#;

#[derive(clap::Parser)]
#[command(name = "demo", about = "Confidential multi-party transfer demo")]
struct Args {
    /// Optional TOML configuration; defaults plus an ephemeral TEE key if absent.
    #[arg(long)]
    config: Option<PathBuf>,
}

struct Party {
    name: &'static str,
    key: SigningKey,
}

impl Party {
    fn new(name: &'static str, seed: u8) -> Result<Self> {
        Ok(Self {
            name,
            key: SigningKey::from_slice(&[seed; 32]).context("party key")?,
        })
    }

    fn address(&self) -> Address {
        public_key_to_address(self.key.verifying_key())
    }

    fn secret(&self) -> SecretKey {
        SecretKey::from(&self.key)
    }

    fn public_key_sec1(&self) -> Bytes {
        Bytes::from(self.secret().public_key().to_sec1_bytes().to_vec())
    }

    /// Seal a balance to the TEE, as the verifier contract would store it.
    fn sealed(&self, tee: &PublicKey, value: &str) -> Result<Bytes> {
        Ok(seal(&self.secret(), tee, value.as_bytes())?.into())
    }
}

/// Print a step header.
fn step(n: u8, total: u8, msg: &str) {
    info!("");
    info!("┌─[{n}/{total}] {msg}");
}

async fn last_message(orch: &DemoOrchestrator) -> Result<AgentMessage> {
    orch.agent()
        .messages()
        .await
        .pop()
        .context("agent received nothing")
}

/// One transfer from `from` to `to`. Returns the transaction digest.
async fn transfer(
    orch: &DemoOrchestrator,
    from: &Party,
    to: &Party,
    nonce: u64,
    amount: &str,
    old_balances: (&str, &str),
    new_balances: (&str, &str),
) -> Result<B256> {
    let open = SignedEnvelope::open(
        nonce,
        TOKEN,
        &FunctionCall::new("transfer", &[("amount", amount)]),
        &from.key,
    )?;
    let opened = orch.submit(&open.encode_raw()).await?;
    info!("│  {} opens {} ({})", from.name, opened.digest, opened.status);

    let recipient = to.address().to_checksum(None);
    let join = SignedEnvelope::join(
        0,
        opened.digest,
        &FunctionCall::new("transfer", &[("to", &recipient)]),
        &to.key,
    )?;
    let joined = orch.submit(&join.encode_raw()).await?;
    info!("│  {} joins ({})", to.name, joined.status);

    let AgentMessage::RequestOldStates { verifier, .. } = last_message(orch).await? else {
        bail!("expected an old states request");
    };
    info!("│  agent calls get_states on {verifier}");

    let tee = orch.tee_public_key();
    let old_states = encode_value_array(&[
        from.sealed(&tee, old_balances.0)?,
        to.sealed(&tee, old_balances.1)?,
    ]);
    let mut status = orch.on_old_states_received(opened.digest, &old_states).await?;
    info!("│  old states delivered ({status})");

    if let AgentMessage::RequestPublicKeys { addresses, .. } = last_message(orch).await? {
        info!("│  service asked for {} public keys", addresses.len());
        let keys: Vec<Bytes> = addresses
            .iter()
            .map(|address| {
                if *address == from.address() {
                    from.public_key_sec1()
                } else {
                    to.public_key_sec1()
                }
            })
            .collect();
        status = orch
            .on_public_keys_received(opened.digest, &encode_value_array(&keys))
            .await?;
        info!("│  public keys delivered ({status})");
    } else {
        info!("│  public keys already cached");
    }

    let AgentMessage::SubmitSignedCall { nonce, payload, .. } = last_message(orch).await? else {
        bail!("expected a signed set_states call");
    };
    info!(
        "│  TEE signed set_states at nonce {nonce} ({} bytes): {} -> {}, {} -> {}",
        payload.len(),
        from.name,
        new_balances.0,
        to.name,
        new_balances.1
    );

    let status = orch.on_finality_report(opened.digest, "SYNCED").await?;
    info!("└─ {} {status}", opened.digest);
    Ok(opened.digest)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .without_time()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => OrchestratorConfig::load(path)?,
        None => OrchestratorConfig::default(),
    };

    // ── Setup ──
    step(1, 4, "Starting orchestrator");
    let keystore = TeeKeystore::from_config(&config)?;
    let orch = Orchestrator::new(
        InMemoryLedger::new(),
        MockExecutionEngine::new(),
        RecordingAgent::new(),
        keystore,
    );
    info!("│  TEE address: {}", orch.tee_address());
    info!("│  chain id:    {}", config.chain_id);

    let deployer = Party::new("deployer", 0x01)?;
    let alice = Party::new("alice", 0x0A)?;
    let bob = Party::new("bob", 0x0B)?;

    // ── Policy ──
    step(2, 4, "Registering ConfidentialToken policy");
    let document: PolicyDocument = serde_json::from_str(TOKEN_POLICY)?;
    let registration = PolicyRegistration {
        verifier: VERIFIER,
        service: SERVICE,
        code_hash: B256::repeat_byte(0xC0),
        document,
    };
    let envelope = SignedEnvelope::register(0, TOKEN, &registration, &deployer.key)?;
    let policy_digest = orch.register_policy(&envelope.encode_raw()).await?;
    info!("│  policy digest {policy_digest}");

    // ── Transfers ──
    step(3, 4, "alice sends 100 to bob");
    orch.engine()
        .set_result(
            "transfer",
            vec![
                Bytes::from_static(b"900"),
                Bytes::from_static(b"150"),
                Bytes::from_static(b"1"),
            ],
        )
        .await;
    transfer(&orch, &alice, &bob, 0, "100", ("1000", "50"), ("900", "150")).await?;

    step(4, 4, "bob sends 25 back, keys now cached");
    orch.engine()
        .set_result(
            "transfer",
            vec![
                Bytes::from_static(b"125"),
                Bytes::from_static(b"925"),
                Bytes::from_static(b"2"),
            ],
        )
        .await;
    transfer(&orch, &bob, &alice, 0, "25", ("150", "900"), ("125", "925")).await?;

    let account = orch.tee_account()?;
    info!("");
    info!("TEE {} emitted {} signed calls", account.address, account.nonce);
    Ok(())
}
