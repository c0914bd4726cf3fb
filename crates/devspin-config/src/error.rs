use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("ホームディレクトリが見つかりません\nヒント: SPIN_HOME 環境変数で保存先を指定できます")]
    HomeDirNotFound,

    #[error(
        "Procfile が見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: Procfile.dev, Procfile\n\
        または SPIN_PROCFILE 環境変数で直接指定できます"
    )]
    ProcfileNotFound,

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
