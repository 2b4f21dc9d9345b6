//! # IP Blocker
//!
//! Blocks SSH brute-force sources at the host firewall for a limited time.
//!
//! ## Mechanics
//! - **Linux**: an `iptables`/`ip6tables` INPUT rule rejecting the source on
//!   the SSH port, tagged with a comment so auditdog only ever touches its
//!   own rules
//! - **Expiry**: no timers; the agent's expiry sweep calls
//!   [`IpBlockManager::release_expired`]
//!
//! ## Safety
//! - Never blocks private/loopback addresses
//! - Addresses reach the command line as `std::net::IpAddr`, so only valid
//!   IP notation is ever passed
//! - Blocking twice keeps one rule

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::response::lockout::minutes_until;
use crate::{capped_minutes, AgentError, AgentResult};

/// Comment attached to every rule auditdog inserts.
pub const RULE_TAG: &str = "AUDITDOG-BLOCK";

/// Check if an IP address is in a private/reserved range.
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()             // 127.0.0.0/8
                || v4.is_private()        // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
                || v4.is_link_local()     // 169.254.0.0/16
                || v4.is_broadcast()      // 255.255.255.255
                || v4.is_unspecified()    // 0.0.0.0
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // fc00::/7 unique local
                || (first & 0xffc0) == 0xfe80 // fe80::/10 link local
        }
    }
}

/// Host firewall operations. Swapped for a recorder in tests.
pub trait Firewall: Send + Sync {
    fn insert_block(&self, ip: &IpAddr) -> AgentResult<()>;
    fn remove_block(&self, ip: &IpAddr) -> AgentResult<()>;
}

/// [`Firewall`] backed by iptables and ip6tables.
#[derive(Debug, Clone)]
pub struct Iptables {
    port: u16,
}

impl Iptables {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    fn binary(ip: &IpAddr) -> &'static str {
        match ip {
            IpAddr::V4(_) => "iptables",
            IpAddr::V6(_) => "ip6tables",
        }
    }

    /// Rule body shared by insert (`-I`) and delete (`-D`).
    fn rule_args(&self, ip: &IpAddr) -> Vec<String> {
        vec![
            "INPUT".into(),
            "-s".into(), ip.to_string(),
            "-p".into(), "tcp".into(),
            "--dport".into(), self.port.to_string(),
            "-m".into(), "comment".into(), "--comment".into(), RULE_TAG.into(),
            "-j".into(), "REJECT".into(),
            "--reject-with".into(), "tcp-reset".into(),
        ]
    }

    fn run(&self, ip: &IpAddr, action: &str) -> AgentResult<()> {
        let binary = Self::binary(ip);
        let output = Command::new(binary)
            .arg(action)
            .args(self.rule_args(ip))
            .output()
            .map_err(|e| AgentError::Response(format!("Failed to execute {}: {}", binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::Response(format!(
                "{} {} failed for {}: {}",
                binary,
                action,
                ip,
                stderr.trim()
            )));
        }
        Ok(())
    }

    /// Remove every tagged rule, including ones left by an earlier run
    /// whose records were lost. Returns the number removed.
    pub fn clear_tagged_rules(&self) -> AgentResult<usize> {
        let mut removed = 0;
        for binary in ["iptables", "ip6tables"] {
            let output = Command::new(binary)
                .args(["-L", "INPUT", "--line-numbers", "-n"])
                .output()
                .map_err(|e| AgentError::Response(format!("Failed to list {} rules: {}", binary, e)))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                log::warn!("[CLEAR] {} list failed: {}", binary, stderr.trim());
                continue;
            }

            // "NUM  target  prot  opt  source  destination  ..."
            let stdout = String::from_utf8_lossy(&output.stdout);
            let mut rule_numbers: Vec<u32> = stdout
                .lines()
                .filter(|line| line.contains(RULE_TAG))
                .filter_map(|line| line.split_whitespace().next()?.parse().ok())
                .collect();

            // Delete from the bottom so line numbers stay valid.
            rule_numbers.sort_unstable_by(|a, b| b.cmp(a));
            for num in rule_numbers {
                match Command::new(binary).args(["-D", "INPUT", &num.to_string()]).output() {
                    Ok(out) if out.status.success() => removed += 1,
                    Ok(out) => log::warn!(
                        "[CLEAR] Failed to remove {} rule #{}: {}",
                        binary,
                        num,
                        String::from_utf8_lossy(&out.stderr).trim()
                    ),
                    Err(e) => log::warn!("[CLEAR] Failed to execute {} -D: {}", binary, e),
                }
            }
        }
        if removed > 0 {
            log::info!("[CLEAR] Removed {} stale {} rules", removed, RULE_TAG);
        }
        Ok(removed)
    }
}

impl Firewall for Iptables {
    fn insert_block(&self, ip: &IpAddr) -> AgentResult<()> {
        self.run(ip, "-I")
    }

    fn remove_block(&self, ip: &IpAddr) -> AgentResult<()> {
        self.run(ip, "-D")
    }
}

// ---------------------------------------------------------------------------
// IpBlockManager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct BlockRecord {
    applied_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Tracks active blocks and keeps the firewall in step. Cheap to clone.
#[derive(Clone)]
pub struct IpBlockManager {
    firewall: Arc<dyn Firewall>,
    blocks: Arc<Mutex<HashMap<IpAddr, BlockRecord>>>,
}

impl IpBlockManager {
    pub fn new(firewall: Arc<dyn Firewall>) -> Self {
        Self {
            firewall,
            blocks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn blocks(&self) -> MutexGuard<'_, HashMap<IpAddr, BlockRecord>> {
        self.blocks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block `ip` for `minutes`. Returns true when the address ends up
    /// blocked, including when it already was.
    pub fn block(&self, ip: IpAddr, minutes: u64) -> bool {
        self.block_at(ip, minutes, Utc::now())
    }

    pub(crate) fn block_at(&self, ip: IpAddr, minutes: u64, now: DateTime<Utc>) -> bool {
        if is_private_ip(&ip) {
            log::warn!("[BLOCK] Refusing to block private/reserved IP: {}", ip);
            return false;
        }

        let mut blocks = self.blocks();
        let expires_at = now + capped_minutes(minutes);
        if let Some(record) = blocks.get_mut(&ip) {
            // Rule is still in place; a lapsed record just gets a new term.
            if record.expires_at <= now {
                record.applied_at = now;
                record.expires_at = expires_at;
            }
            return true;
        }

        match self.firewall.insert_block(&ip) {
            Ok(()) => {
                blocks.insert(ip, BlockRecord { applied_at: now, expires_at });
                log::warn!("[BLOCK] Blocked {} for {} minutes (tag: {})", ip, minutes, RULE_TAG);
                true
            }
            Err(e) => {
                log::error!("[BLOCK] Failed to block {}: {}", ip, e);
                false
            }
        }
    }

    /// Remove the block on `ip`. False when it was not blocked or the
    /// firewall refused.
    pub fn unblock(&self, ip: IpAddr) -> bool {
        let mut blocks = self.blocks();
        if !blocks.contains_key(&ip) {
            return false;
        }
        match self.firewall.remove_block(&ip) {
            Ok(()) => {
                blocks.remove(&ip);
                log::info!("[UNBLOCK] Unblocked {}", ip);
                true
            }
            Err(e) => {
                log::error!("[UNBLOCK] Failed to unblock {}: {}", ip, e);
                false
            }
        }
    }

    /// True while a block is active and has not run out.
    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        self.is_blocked_at(ip, Utc::now())
    }

    pub(crate) fn is_blocked_at(&self, ip: IpAddr, now: DateTime<Utc>) -> bool {
        self.blocks()
            .get(&ip)
            .map(|r| r.expires_at > now)
            .unwrap_or(false)
    }

    /// Whole minutes left on the block, rounded up. 0 when not blocked.
    pub fn remaining_minutes(&self, ip: IpAddr) -> u64 {
        self.remaining_minutes_at(ip, Utc::now())
    }

    pub(crate) fn remaining_minutes_at(&self, ip: IpAddr, now: DateTime<Utc>) -> u64 {
        self.blocks()
            .get(&ip)
            .map(|r| minutes_until(r.expires_at, now))
            .unwrap_or(0)
    }

    pub fn blocked_ips(&self) -> Vec<IpAddr> {
        let mut ips: Vec<IpAddr> = self.blocks().keys().copied().collect();
        ips.sort();
        ips
    }

    /// Drop every block that ran out by `now`. Records go away even when
    /// the firewall call fails, so a broken rule is not retried forever.
    pub fn release_expired(&self, now: DateTime<Utc>) -> Vec<IpAddr> {
        let mut blocks = self.blocks();
        let expired: Vec<IpAddr> = blocks
            .iter()
            .filter(|(_, r)| r.expires_at <= now)
            .map(|(ip, _)| *ip)
            .collect();

        for ip in &expired {
            if let Some(record) = blocks.remove(ip) {
                match self.firewall.remove_block(ip) {
                    Ok(()) => log::info!(
                        "[UNBLOCK] Block on {} expired after {} minutes",
                        ip,
                        (record.expires_at - record.applied_at).num_minutes()
                    ),
                    Err(e) => log::error!("[UNBLOCK] Block on {} expired but removal failed: {}", ip, e),
                }
            }
        }
        expired
    }

    /// Remove every active block, for shutdown.
    pub fn release_all(&self) -> usize {
        self.blocked_ips()
            .into_iter()
            .filter(|ip| self.unblock(*ip))
            .count()
    }
}
