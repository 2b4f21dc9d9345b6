//! # Response Actions
//!
//! What auditdog does about a detection besides reporting it.
//! DEFENSE ONLY: accounts get locked and sources get blocked, both for a
//! limited time, and alerts go out. Nothing ever reaches back to an
//! attacker.
//!
//! - [`lockout`]: temporary account locks for repeated sudo/su failures
//! - [`blocker`]: temporary firewall blocks for SSH brute force sources
//! - [`alerter`]: webhook notifications
//!
//! Mitigation failures are returned as plain results and logged. They never
//! stop the agent.

pub mod alerter;
pub mod blocker;
pub mod lockout;
