//! Reference collaborator implementations (§C): a TCP-connect scanner, a
//! best-effort ICMP scanner built on the system `ping` binary, an HTTP
//! device registry client, and a polling file-backed KV store. None of
//! these are part of the specified core (§1 treats their internals as out
//! of scope); they exist so the workspace produces a runnable binary.

pub mod file_kv;
pub mod http_registry;
pub mod icmp_scanner;
pub mod tcp_scanner;

pub use file_kv::FileKvStore;
pub use http_registry::HttpDeviceRegistry;
pub use icmp_scanner::BestEffortIcmpScanner;
pub use tcp_scanner::TcpConnectScanner;
