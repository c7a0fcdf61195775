//! StackFlow Core
//!
//! KDLで宣言されたクラウドスタック（ネットワーク・アクセスポリシー・シークレット・
//! データストア・コンテナ実行環境・ワークロード・ルーティング・エッジ配信・監視・CI/CD）を
//! 読み込み、参照を解決した `Stack` に組み立てます。
//!
//! ```text
//! stack.kdl ──▶ loader (tera展開) ──▶ parser ──▶ StackSpec
//!                                                  │
//!                        DeployContext ──▶ builder::compose
//!                                                  │
//!                                                  ▼
//!                                                Stack
//! ```

pub mod builder;
pub mod context;
pub mod discovery;
pub mod error;
pub mod loader;
pub mod model;
pub mod parser;
pub mod template;

// Re-exports
pub use builder::{
    AccessPolicy, Bucket, Compute, DataStores, Database, Delivery, Edge, Instance, LogGroup,
    Observability, Proxy, Queue, Registry, Role, Routing, SecretStore, Stack, TargetGroup,
    TaskDefinition, Workloads, compose,
};
pub use context::DeployContext;
pub use discovery::{DiscoveredFiles, discover_files, find_project_root};
pub use error::{Result, StackError};
pub use loader::{load_project, load_project_from_root};
pub use model::*;
pub use parser::{parse_kdl_file, parse_kdl_string};
pub use template::{TemplateProcessor, Variables, extract_variables};
