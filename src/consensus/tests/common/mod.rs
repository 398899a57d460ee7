//! Test harness: one committee on an in-memory network

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use shardbft_consensus::devnet::{DevChain, DevMultiSig, InMemoryNetwork, NetworkHandle};
use shardbft_consensus::{
    Agree, BftMessage, Collaborators, Commit, ConsensusMetrics, Mailbox, NetworkCollaborator, PhaseEngine,
    Propose, Ready, Req, RoundContext, TimingConfig,
};
use shardbft_core::{ChainCollaborator, Hash, Layer, MultiSigned, PendingBlock, PublicKey, SignatureCoordinator};

/// Log to the test writer; repeated calls are harmless
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn key(i: usize) -> PublicKey {
    PublicKey::new(vec![i as u8 + 1; 32])
}

/// Short phases so paused-time tests stay readable
pub fn test_timing() -> TimingConfig {
    TimingConfig {
        listen_timeout: Duration::from_secs(2),
        agree_timeout: Duration::from_secs(1),
        commit_timeout: Duration::from_secs(1),
        max_network_delay: Duration::from_millis(10),
        max_normal_retry: 5,
        min_beacon_block_interval: Duration::from_millis(100),
        min_shard_block_interval: Duration::from_millis(100),
        idle_backoff: Duration::from_millis(50),
        block_creation_grace: Duration::from_millis(500),
    }
}

pub struct Harness {
    pub layer: Layer,
    pub keys: Vec<PublicKey>,
    pub network: InMemoryNetwork,
    pub chains: Vec<Arc<DevChain>>,
    pub signers: Vec<Arc<DevMultiSig>>,
    pub handles: Vec<NetworkHandle>,
    pub mailboxes: Vec<Option<Mailbox>>,
    pub timing: TimingConfig,
}

impl Harness {
    pub fn new(n: usize, layer: Layer) -> Self {
        let keys: Vec<PublicKey> = (0..n).map(key).collect();
        let network = InMemoryNetwork::new();
        let seed = Hash::of(b"test-committee");

        let mut chains = Vec::new();
        let mut signers = Vec::new();
        let mut handles = Vec::new();
        let mut mailboxes = Vec::new();
        for k in &keys {
            chains.push(Arc::new(DevChain::new(k.clone(), layer, keys.clone())));
            signers.push(Arc::new(DevMultiSig::new(k.clone(), seed)));
            let (handle, mailbox) = network.register(k.clone(), layer);
            handles.push(handle);
            mailboxes.push(Some(mailbox));
        }

        Self {
            layer,
            keys,
            network,
            chains,
            signers,
            handles,
            mailboxes,
            timing: test_timing(),
        }
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Replace node `i`'s chain
    pub fn set_chain(&mut self, i: usize, chain: DevChain) {
        self.chains[i] = Arc::new(chain);
    }

    pub fn collaborators(&self, i: usize) -> Collaborators {
        Collaborators {
            chain: self.chains[i].clone(),
            network: Arc::new(self.handles[i].clone()),
            signer: self.signers[i].clone(),
        }
    }

    /// Committee index of the proposer of the first block in `round`
    pub fn proposer(&self, round: u64) -> usize {
        let proposer = self.chains[0].proposer_for(1, round);
        self.keys.iter().position(|k| k == proposer).unwrap()
    }

    pub fn best_state(&self) -> Hash {
        self.chains[0].best_hash()
    }

    pub fn take_mailbox(&mut self, i: usize) -> Mailbox {
        self.mailboxes[i].take().expect("mailbox already taken")
    }

    /// Engine for node `i` in `round`, with its own metrics
    pub async fn engine(&mut self, i: usize, round: u64) -> (PhaseEngine, Mailbox, Arc<ConsensusMetrics>) {
        let chain = &self.chains[i];
        let role = chain.get_pubkey_role(&self.keys[i], self.layer, round).await.unwrap();
        let ctx = RoundContext::new(
            chain.committee(self.layer).await.unwrap(),
            round,
            self.layer,
            chain.best_state_hash(self.layer).await.unwrap(),
        )
        .unwrap();
        let metrics = Arc::new(ConsensusMetrics::new().unwrap());
        let engine = PhaseEngine::new(
            ctx,
            self.keys[i].clone(),
            role,
            self.collaborators(i),
            self.timing.clone(),
            metrics.clone(),
        )
        .unwrap();
        (engine, self.take_mailbox(i), metrics)
    }

    /// Gossip `msg` from node `from` to everyone else
    pub async fn send(&self, from: usize, msg: BftMessage) {
        self.handles[from]
            .push(self.layer, &msg, &HashSet::new())
            .await
            .unwrap();
    }

    pub fn ready(&self, from: usize, round: u64) -> BftMessage {
        self.ready_at(from, round, 0)
    }

    /// Ready reporting `pool_height` as the sender's latest valid height
    pub fn ready_at(&self, from: usize, round: u64, pool_height: u64) -> BftMessage {
        Ready::new(round, self.best_state(), self.keys[from].clone(), pool_height).into()
    }

    pub fn req(&self, from: usize, round: u64) -> BftMessage {
        Req::new(round, self.best_state(), self.keys[from].clone()).into()
    }

    /// Candidate block built by node `from` and its Propose message
    pub async fn proposal(&self, from: usize, round: u64) -> (BftMessage, PendingBlock) {
        let block = self.chains[from]
            .create_candidate_block(self.layer, round, 0)
            .await
            .unwrap();
        let msg = Propose::new(round, self.best_state(), self.keys[from].clone(), block.to_bytes().unwrap()).into();
        (msg, block)
    }

    pub fn agree(&self, from: usize, round: u64, block: &Hash) -> BftMessage {
        let ri = self.signers[from].generate_personal_commitment(block).unwrap();
        Agree::new(round, self.best_state(), self.keys[from].clone(), ri, *block).into()
    }

    /// Ri list as node `from` would have collected it from `contributors`
    pub fn ri_list(&self, block: &Hash, contributors: &[usize]) -> BTreeMap<PublicKey, Vec<u8>> {
        contributors
            .iter()
            .map(|i| {
                let ri = self.signers[*i].generate_personal_commitment(block).unwrap();
                (self.keys[*i].clone(), ri)
            })
            .collect()
    }

    /// Commit from node `from`, signed under the R of `contributors`
    pub fn commit(&self, from: usize, round: u64, block: &Hash, contributors: &[usize]) -> BftMessage {
        let share = self.signers[from]
            .sign_data(block, &self.keys, &self.ri_list(block, contributors))
            .unwrap();
        Commit::new(
            round,
            self.best_state(),
            self.keys[from].clone(),
            share.sig,
            share.r,
            share.validators_idx_r,
        )
        .into()
    }
}

/// Wait for the first message of `node`'s mailbox matching `pred`
pub async fn wait_for<F>(mailbox: &mut Mailbox, mut pred: F) -> BftMessage
where
    F: FnMut(&BftMessage) -> bool,
{
    let search = async {
        loop {
            match mailbox.next().await {
                Some(msg) if pred(&msg) => return msg,
                Some(_) => continue,
                None => panic!("mailbox closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(120), search)
        .await
        .expect("message never arrived")
}

impl Harness {
    /// Finalize the next block on the chains of `nodes` without running a round
    pub async fn extend_chains(&self, nodes: &[usize]) -> PendingBlock {
        let base = &self.chains[nodes[0]];
        let height = base.height() + 1;
        let producer = base.proposer_for(height, 1).clone();
        let scratch = DevChain::new(producer, self.layer, self.keys.clone());
        for block in base.blocks() {
            scratch.insert_block(block).await.unwrap();
        }

        let mut block = scratch.create_candidate_block(self.layer, 1, 0).await.unwrap();
        let all: Vec<usize> = (0..self.keys.len()).collect();
        block.set_multi_signature("r", "agg", &all, &all);
        for i in nodes {
            self.chains[*i].insert_block(block.clone()).await.unwrap();
        }
        block
    }
}

pub fn block_hash(block: &PendingBlock) -> Hash {
    block.message_hash()
}
