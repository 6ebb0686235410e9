//! # veil-engine
//!
//! Core of VeilBox: turns a connection profile plus user policy into a
//! sing-box configuration and supervises the sing-box process that runs it.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | **types** | Profile, mode/transport/template enums, constants, errors |
//! | **policy** | Split-tunnel, DNS, region routing and metrics settings |
//! | **document** | Typed sing-box configuration tree |
//! | **dns** | DNS block – defaults, upstream normalisation, kind inference |
//! | **routing** | Ordered routing rules and rule-set references |
//! | **config** | `synthesize` – profile + policy → document |
//! | **settings** | Supervisor settings and cache-file policy |
//! | **cache** | Cache-file contention handling and fallback pruning |
//! | **process** | sing-box binary location, spawn, line relays, signals |
//! | **supervisor** | Single-engine lifecycle: start, stop, exit watching |
//! | **logging** | Engine log lines and sinks |
//! | **collaborators** | Parser, system proxy and metrics feed interfaces |
//! | **service** | Connect / disconnect / reconnect orchestration |

pub mod singbox;
