//! Procfile (`name: command`) の読み込み

use anyhow::{Context, bail};
use devspin_core::validate_name;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcfileEntry {
    pub name: String,
    pub command: String,
}

pub fn load(path: &Path) -> anyhow::Result<Vec<ProcfileEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Procfile を読み込めません: {}", path.display()))?;
    parse(&content).with_context(|| format!("Procfile の形式が不正です: {}", path.display()))
}

/// 空行と `#` で始まる行は無視する
pub fn parse(content: &str) -> anyhow::Result<Vec<ProcfileEntry>> {
    let mut entries = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((name, command)) = line.split_once(':') else {
            bail!("{}行目: 'name: command' の形式で記述してください", idx + 1);
        };
        let name = name.trim();
        let command = command.trim();

        validate_name(name).map_err(|e| anyhow::anyhow!("{}行目: {}", idx + 1, e))?;
        if command.is_empty() {
            bail!("{}行目: '{}' のコマンドが空です", idx + 1, name);
        }
        if !seen.insert(name.to_string()) {
            bail!("{}行目: '{}' が重複しています", idx + 1, name);
        }

        entries.push(ProcfileEntry {
            name: name.to_string(),
            command: command.to_string(),
        });
    }

    if entries.is_empty() {
        bail!("プロセスが1つも定義されていません");
    }
    Ok(entries)
}
