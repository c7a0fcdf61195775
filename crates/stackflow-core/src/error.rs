use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("KDLパースエラー: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("ファイル読み込みエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO エラー: {path}\n理由: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("無効な設定: {0}")]
    InvalidConfig(String),

    #[error("テンプレートエラー: {file}\n理由: {message}")]
    TemplateError { file: PathBuf, message: String },

    #[error("テンプレート展開エラー: {0}")]
    TemplateRenderError(String),

    #[error(
        "プロジェクトルートが見つかりません\n探索開始位置: {0}\nヒント: stack.kdl ファイルを含むディレクトリで実行してください"
    )]
    ProjectRootNotFound(PathBuf),

    #[error(
        "デプロイ先が未指定です: {0}\nヒント: --account/--region または CDK_DEFAULT_ACCOUNT/CDK_DEFAULT_REGION を設定してください"
    )]
    MissingDeployTarget(String),

    #[error("{kind} '{name}' が宣言されていません（参照元: {referrer}）")]
    UnknownResource {
        kind: &'static str,
        name: String,
        referrer: String,
    },

    #[error("{kind} '{name}' が重複して宣言されています")]
    DuplicateResource { kind: &'static str, name: String },

    #[error("シークレット '{secret}' にキー '{key}' は宣言されていません（参照元: {consumer}）")]
    UndeclaredSecretKey {
        secret: String,
        key: String,
        consumer: String,
    },

    #[error(
        "タスク定義 '{task}' のコンテナ '{container}' が未宣言のコンテナ '{dependency}' に依存しています"
    )]
    UndeclaredContainer {
        task: String,
        container: String,
        dependency: String,
    },

    #[error(
        "タスク定義 '{task}' のコンテナ '{container}' が未宣言のボリューム '{volume}' をマウントしています"
    )]
    UndeclaredVolume {
        task: String,
        container: String,
        volume: String,
    },

    #[error("タスク定義 '{task}' のコンテナ依存が循環しています: {cycle}")]
    CircularDependency { task: String, cycle: String },

    #[error("ネットワーク '{0}' のプライベートサブネットにはNATゲートウェイが1つ以上必要です")]
    MissingNatGateway(String),

    #[error("セキュリティグループ '{group}' のピア '{peer}' を解決できません")]
    UnknownPeer { group: String, peer: String },

    #[error("リスナー '{0}' にデフォルトのターゲットグループもアクションもありません")]
    ListenerWithoutTarget(String),

    #[error(
        "ターゲットグループ '{target_group}' のヘルスチェックポート {port} はタスク定義 '{task}' のどのポートマッピングとも一致しません"
    )]
    HealthCheckPortMismatch {
        target_group: String,
        task: String,
        port: u16,
    },

    #[error(
        "パイプライン '{pipeline}' のアクション '{action}' の入力アーティファクト '{artifact}' を出力するステージがありません"
    )]
    ArtifactMismatch {
        pipeline: String,
        action: String,
        artifact: String,
    },

    #[error("コンテナ '{0}' に image が指定されていません")]
    MissingImage(String),
}

pub type Result<T> = std::result::Result<T, StackError>;
