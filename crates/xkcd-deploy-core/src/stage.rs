use serde::Serialize;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Config,
    Credentials,
    KeyMaterial,
    Stack,
    Artifact,
    Rollout,
    Assets,
    Report,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Config,
        Stage::Credentials,
        Stage::KeyMaterial,
        Stage::Stack,
        Stage::Artifact,
        Stage::Rollout,
        Stage::Assets,
        Stage::Report,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Config => "config",
            Stage::Credentials => "credentials",
            Stage::KeyMaterial => "key_material",
            Stage::Stack => "stack",
            Stage::Artifact => "artifact",
            Stage::Rollout => "rollout",
            Stage::Assets => "assets",
            Stage::Report => "report",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A stage that completed, with its wall time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub duration_ms: u64,
}
