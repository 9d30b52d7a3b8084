//! # Ethereum Service
//!
//! Installs a private Ethereum network on the nodes bound to its virtual
//! nodes. Each virtual node is an [`EthereumServer`] obtained from
//! [`EthereumService::install`], configured through chainable setters.
//!
//! ## Roles
//!
//! - **Boot nodes** publish their enode URL over HTTP on port
//!   [`BOOTNODE_HTTP_PORT`]; every other server fetches those URLs at start
//!   and passes them to `geth --bootnodes`.
//! - **Sealers** (servers that start the miner) seal blocks; under proof of
//!   authority the first account of every sealer is a clique signer,
//!   listed in genesis `extraData` in declaration order.
//!
//! ## Accounts
//!
//! Keys are never generated here. With an [`AccountProvider`] attached, the
//! provider returns addresses and keystore files, and the addresses are
//! prefunded in the genesis block. Without one, accounts are created inside
//! the container by `geth account new` at first start and are not
//! prefunded.
//!
//! ## Files written on each hosting node
//!
//! | path | content |
//! |------|---------|
//! | `/tmp/eth-genesis.json` | shared genesis block |
//! | `/tmp/eth-password` | account password |
//! | `/tmp/run.sh` | start script (launched automatically unless `manual`) |
//! | `/tmp/keystore/*` | provider keystore files, copied at start |

use super::{Service, ServiceContext};
use crate::error::{EmuError, Result};
use crate::layer::{Layer, RenderContext};
use crate::registry::NodeRef;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::rc::Rc;

pub const BOOTNODE_HTTP_PORT: u16 = 8088;
pub const GETH_HTTP_PORT: u16 = 8545;
pub const DEFAULT_CHAIN_ID: u64 = 1337;
pub const DATA_DIR: &str = "/root/.ethereum";

const GENESIS_PATH: &str = "/tmp/eth-genesis.json";
const PASSWORD_PATH: &str = "/tmp/eth-password";
const RUN_SCRIPT_PATH: &str = "/tmp/run.sh";
const KEYSTORE_STAGING: &str = "/tmp/keystore";
const DEFAULT_PASSWORD: &str = "admin";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusMechanism {
    /// Clique proof of authority
    #[default]
    Poa,
    /// Ethash proof of work
    Pow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountRequest {
    /// Initial balance in wei
    #[serde(serialize_with = "wei_as_string")]
    pub balance: u128,
    pub count: u32,
    pub password: String,
    /// Host directory the operator keeps keystore copies in
    pub keystore_dir: Option<String>,
}

// JSON numbers stop at u64; wei amounts routinely do not.
fn wei_as_string<S: serde::Serializer>(wei: &u128, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(wei)
}

/// One account handed out by an [`AccountProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthAccount {
    /// Hex address without `0x`
    pub address: String,
    pub keystore_file: String,
    pub keystore_json: String,
}

/// External keystore source.
pub trait AccountProvider {
    fn create_accounts(&self, virtual_node: &str, request: &AccountRequest) -> Result<Vec<EthAccount>>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EthereumServer {
    name: String,
    boot_node: bool,
    accounts: Vec<AccountRequest>,
    unlock_accounts: bool,
    start_miner: bool,
    external_connection: bool,
}

impl EthereumServer {
    fn new(name: &str) -> Self {
        EthereumServer {
            name: name.to_string(),
            ..EthereumServer::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_boot_node(&mut self, boot_node: bool) -> &mut Self {
        self.boot_node = boot_node;
        self
    }

    pub fn create_prefunded_accounts(
        &mut self,
        balance: u128,
        count: u32,
        password: impl Into<String>,
        keystore_dir: Option<String>,
    ) -> &mut Self {
        self.accounts.push(AccountRequest {
            balance,
            count,
            password: password.into(),
            keystore_dir,
        });
        self
    }

    pub fn unlock_accounts(&mut self) -> &mut Self {
        self.unlock_accounts = true;
        self
    }

    pub fn start_miner(&mut self) -> &mut Self {
        self.start_miner = true;
        self
    }

    /// Serve the geth HTTP RPC on all interfaces.
    pub fn enable_external_connection(&mut self) -> &mut Self {
        self.external_connection = true;
        self
    }

    pub fn is_boot_node(&self) -> bool {
        self.boot_node
    }

    pub fn is_sealer(&self) -> bool {
        self.start_miner
    }

    pub fn account_requests(&self) -> &[AccountRequest] {
        &self.accounts
    }

    fn account_count(&self) -> u32 {
        self.accounts.iter().map(|request| request.count).sum()
    }

    fn password(&self) -> &str {
        self.accounts
            .first()
            .map(|request| request.password.as_str())
            .unwrap_or(DEFAULT_PASSWORD)
    }
}

#[derive(Clone, Default)]
pub struct EthereumService {
    consensus: ConsensusMechanism,
    save_state: bool,
    manual: bool,
    chain_id: u64,
    servers: Vec<EthereumServer>,
    account_provider: Option<Rc<dyn AccountProvider>>,
}

impl fmt::Debug for EthereumService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EthereumService")
            .field("consensus", &self.consensus)
            .field("save_state", &self.save_state)
            .field("manual", &self.manual)
            .field("chain_id", &self.chain_id)
            .field("servers", &self.servers.len())
            .field("account_provider", &self.account_provider.is_some())
            .finish()
    }
}

impl EthereumService {
    /// `save_state` mounts a host state directory per server;
    /// `manual` leaves launching geth to the operator.
    pub fn new(save_state: bool, manual: bool) -> Self {
        EthereumService {
            save_state,
            manual,
            chain_id: DEFAULT_CHAIN_ID,
            ..EthereumService::default()
        }
    }

    pub fn set_consensus(&mut self, consensus: ConsensusMechanism) -> &mut Self {
        self.consensus = consensus;
        self
    }

    pub fn set_chain_id(&mut self, chain_id: u64) -> &mut Self {
        self.chain_id = chain_id;
        self
    }

    pub fn set_account_provider(&mut self, provider: Rc<dyn AccountProvider>) -> &mut Self {
        self.account_provider = Some(provider);
        self
    }

    pub fn consensus(&self) -> ConsensusMechanism {
        self.consensus
    }

    pub fn save_state(&self) -> bool {
        self.save_state
    }

    pub fn is_manual(&self) -> bool {
        self.manual
    }

    /// Declare a virtual node; installing an existing name returns its handle.
    pub fn install(&mut self, name: &str) -> &mut EthereumServer {
        let index = match self.servers.iter().position(|server| server.name == name) {
            Some(index) => index,
            None => {
                self.servers.push(EthereumServer::new(name));
                self.servers.len() - 1
            }
        };
        &mut self.servers[index]
    }

    pub fn server(&self, name: &str) -> Option<&EthereumServer> {
        self.servers.iter().find(|server| server.name == name)
    }

    pub fn servers(&self) -> &[EthereumServer] {
        &self.servers
    }

    pub fn boot_nodes(&self) -> impl Iterator<Item = &EthereumServer> + '_ {
        self.servers.iter().filter(|server| server.boot_node)
    }

    pub fn sealers(&self) -> impl Iterator<Item = &EthereumServer> + '_ {
        self.servers.iter().filter(|server| server.start_miner)
    }

    fn genesis(&self, accounts: &BTreeMap<String, Vec<EthAccount>>) -> serde_json::Value {
        let mut alloc = serde_json::Map::new();
        let mut signers = String::new();

        for server in &self.servers {
            let Some(created) = accounts.get(&server.name) else { continue };
            // geth seals with the etherbase, which defaults to the first account
            if server.start_miner {
                if let Some(etherbase) = created.first() {
                    signers.push_str(&etherbase.address);
                }
            }
            let mut created = created.iter();
            for request in &server.accounts {
                for account in created.by_ref().take(request.count as usize) {
                    alloc.insert(
                        account.address.clone(),
                        json!({ "balance": request.balance.to_string() }),
                    );
                }
            }
        }

        let mut config = json!({
            "chainId": self.chain_id,
            "homesteadBlock": 0,
            "eip150Block": 0,
            "eip155Block": 0,
            "eip158Block": 0,
            "byzantiumBlock": 0,
            "constantinopleBlock": 0,
            "petersburgBlock": 0,
            "istanbulBlock": 0,
        });
        let (difficulty, extra_data) = match self.consensus {
            ConsensusMechanism::Poa => {
                config["clique"] = json!({ "period": 15, "epoch": 30000 });
                ("0x1", format!("0x{}{}{}", "0".repeat(64), signers, "0".repeat(130)))
            }
            ConsensusMechanism::Pow => {
                config["ethash"] = json!({});
                ("0x400", "0x".to_string())
            }
        };

        json!({
            "config": config,
            "difficulty": difficulty,
            "gasLimit": "0x7A1200",
            "extraData": extra_data,
            "alloc": alloc,
        })
    }

    fn run_script(
        &self,
        server: &EthereumServer,
        bootnode_addresses: &[Ipv4Addr],
        keystore_files: &[String],
    ) -> String {
        let mut script = String::from("#!/bin/bash\n");
        script.push_str(&format!(
            "[ -d {dir}/geth ] || geth --datadir {dir} init {genesis}\n",
            dir = DATA_DIR,
            genesis = GENESIS_PATH
        ));

        if !keystore_files.is_empty() {
            script.push_str(&format!(
                "mkdir -p {dir}/keystore\ncp -n {staging}/* {dir}/keystore/\n",
                dir = DATA_DIR,
                staging = KEYSTORE_STAGING
            ));
        } else if server.account_count() > 0 {
            script.push_str(&format!(
                "if [ -z \"$(ls -A {dir}/keystore 2> /dev/null)\" ]; then\n    for i in $(seq {count}); do geth --datadir {dir} account new --password {password} > /dev/null; done\nfi\n",
                dir = DATA_DIR,
                count = server.account_count(),
                password = PASSWORD_PATH
            ));
        }
        for request in &server.accounts {
            if let Some(dir) = &request.keystore_dir {
                script.push_str(&format!(
                    "mkdir -p {dir} && cp -n {data}/keystore/* {dir}/ 2> /dev/null || true\n",
                    dir = dir,
                    data = DATA_DIR
                ));
            }
        }

        let mut args = vec![
            format!("--datadir {}", DATA_DIR),
            format!("--identity=\"{}\"", server.name),
            format!("--networkid={}", self.chain_id),
            "--syncmode full".to_string(),
            "--snapshot=false".to_string(),
            "--verbosity=2".to_string(),
            "--allow-insecure-unlock".to_string(),
            "--port 30303".to_string(),
        ];
        if server.external_connection {
            args.push(format!(
                "--http --http.addr 0.0.0.0 --http.port {} --http.corsdomain \"*\" --http.api web3,eth,debug,personal,net,clique,admin,txpool",
                GETH_HTTP_PORT
            ));
        }
        if server.unlock_accounts && server.account_count() > 0 {
            let indices: Vec<String> = (0..server.account_count()).map(|i| i.to_string()).collect();
            args.push(format!(
                "--unlock \"{}\" --password {}",
                indices.join(","),
                PASSWORD_PATH
            ));
        }
        if server.start_miner {
            args.push("--mine --miner.threads=1".to_string());
        }

        if server.boot_node {
            script.push_str(&format!(
                "nohup geth {args} > /tmp/geth.log 2>&1 &\n\
                 mkdir -p /tmp/eth-http\n\
                 until geth attach {dir}/geth.ipc --exec admin.nodeInfo.enode 2> /dev/null | tr -d '\"' > /tmp/eth-http/eth-enode-url && [ -s /tmp/eth-http/eth-enode-url ]; do sleep 1; done\n\
                 python3 -m http.server {port} -d /tmp/eth-http\n",
                args = args.join(" "),
                dir = DATA_DIR,
                port = BOOTNODE_HTTP_PORT
            ));
        } else {
            script.push_str("BOOTNODES=\"\"\n");
            for addr in bootnode_addresses {
                script.push_str(&format!(
                    "until URL=$(curl -sf http://{addr}:{port}/eth-enode-url); do sleep 3; done\nBOOTNODES=\"${{BOOTNODES:+$BOOTNODES,}}$URL\"\n",
                    addr = addr,
                    port = BOOTNODE_HTTP_PORT
                ));
            }
            script.push_str(&format!(
                "geth {} ${{BOOTNODES:+--bootnodes $BOOTNODES}}\n",
                args.join(" ")
            ));
        }
        script
    }
}

/// Host subpath of a server's state directory: `eth-states/{n}`, where `n`
/// is the numeric suffix of the virtual node name, or the whole name.
///
/// A server hosted on several nodes gets one subdirectory per node below it.
pub fn state_subpath(virtual_node: &str) -> String {
    let digits = virtual_node.len()
        - virtual_node
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .count();
    let suffix = &virtual_node[digits..];
    if suffix.is_empty() {
        format!("eth-states/{}", virtual_node)
    } else {
        format!("eth-states/{}", suffix)
    }
}

impl Layer for EthereumService {
    fn name(&self) -> &str {
        "EthereumService"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["Base".to_string()]
    }

    fn materialize(&self, _ctx: &mut RenderContext<'_>) -> Result<()> {
        let boot_nodes = self.boot_nodes().count();
        log::info!(
            "EthereumService: {} servers ({} boot nodes, {} sealers), consensus {:?}",
            self.servers.len(),
            boot_nodes,
            self.sealers().count(),
            self.consensus
        );
        if boot_nodes == 0 && !self.servers.is_empty() {
            log::warn!("EthereumService has no boot node; servers will not discover each other");
        }
        if self.account_provider.is_none() && self.servers.iter().any(|s| s.account_count() > 0) {
            log::warn!("EthereumService has no account provider; accounts are created at start-up and not prefunded");
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_service(&self) -> Option<&dyn Service> {
        Some(self)
    }
}

impl Service for EthereumService {
    fn service_name(&self) -> &str {
        "EthereumService"
    }

    fn virtual_nodes(&self) -> Vec<String> {
        self.servers.iter().map(|server| server.name.clone()).collect()
    }

    fn virtual_node_config(&self, name: &str) -> Option<serde_json::Value> {
        self.server(name)
            .and_then(|server| serde_json::to_value(server).ok())
    }

    fn configure(&self, ctx: &mut ServiceContext<'_>) -> Result<()> {
        if self.save_state {
            let mut owners: BTreeMap<String, &str> = BTreeMap::new();
            for server in &self.servers {
                let subpath = state_subpath(&server.name);
                if let Some(owner) = owners.insert(subpath.clone(), &server.name) {
                    return Err(EmuError::InvalidTopology(format!(
                        "virtual nodes {} and {} both map to state directory {}",
                        owner, server.name, subpath
                    )));
                }
            }
        }

        let mut accounts: BTreeMap<String, Vec<EthAccount>> = BTreeMap::new();
        if let Some(provider) = &self.account_provider {
            for server in &self.servers {
                let mut created = Vec::new();
                for request in &server.accounts {
                    created.extend(provider.create_accounts(&server.name, request)?);
                }
                accounts.insert(server.name.clone(), created);
            }
        }
        let genesis = serde_json::to_string_pretty(&self.genesis(&accounts))?;

        let mut bootnode_addresses = Vec::new();
        for server in self.boot_nodes() {
            for host in ctx.hosts_of(&server.name) {
                let addr = ctx
                    .registry
                    .node(host)
                    .and_then(|node| node.primary_address())
                    .ok_or_else(|| {
                        EmuError::InvalidTopology(format!("boot node host {} has no address", host))
                    })?;
                bootnode_addresses.push(addr);
            }
        }

        let mut configured = 0usize;
        for server in &self.servers {
            let hosts: Vec<NodeRef> = ctx.hosts_of(&server.name).to_vec();
            let created = accounts.get(&server.name).map(Vec::as_slice).unwrap_or(&[]);
            let keystore_files: Vec<String> = created.iter().map(|a| a.keystore_file.clone()).collect();
            let script = self.run_script(server, &bootnode_addresses, &keystore_files);
            let state_dir = state_subpath(&server.name);

            for host in &hosts {
                let node = ctx.registry.node_mut(host)?;
                node.add_software("software-properties-common")
                    .add_software("curl")
                    .add_software("python3")
                    .add_build_command(
                        "add-apt-repository -y ppa:ethereum/ethereum && apt-get update && apt-get install -y ethereum",
                    )
                    .set_file(GENESIS_PATH, genesis.as_str())
                    .set_file(PASSWORD_PATH, format!("{}\n", server.password()))
                    .set_executable(RUN_SCRIPT_PATH, script.as_str());
                for account in created {
                    node.set_file(
                        format!("{}/{}", KEYSTORE_STAGING, account.keystore_file),
                        account.keystore_json.as_str(),
                    );
                }
                if self.save_state {
                    if hosts.len() > 1 {
                        node.add_state_volume(format!("{}/{}", state_dir, host), DATA_DIR);
                    } else {
                        node.add_state_volume(state_dir.as_str(), DATA_DIR);
                    }
                }
                if !self.manual {
                    node.append_start_command(RUN_SCRIPT_PATH, true);
                }
                configured += 1;
            }
        }

        log::info!("EthereumService configured {} hosting nodes", configured);
        Ok(())
    }
}
