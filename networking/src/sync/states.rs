/// Fast sync phase state machine.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    /// Sync not started yet.
    #[default]
    Idle,

    /// Downloading the checkpoint block and the six root hashes and cross-checking them
    /// against the requested checkpoint.
    VerifyingCheckpoint,

    /// Downloading trie nodes and block headers.
    ///
    /// Both downloads run at the same time and the phase lasts until both report done.
    Downloading,

    /// Pointing every trie at its downloaded root and committing the snapshot.
    Committing,

    /// Sync finished and the complete marker is persisted. Terminal.
    Completed,

    /// Sync stopped on an error. A restart resumes from persisted progress.
    Failed,
}

impl SyncPhase {
    /// Check if a transition to the target phase is valid.
    pub fn can_transition_to(&self, target: SyncPhase) -> bool {
        match self {
            SyncPhase::Idle => matches!(
                target,
                SyncPhase::VerifyingCheckpoint | SyncPhase::Downloading | SyncPhase::Failed
            ),
            SyncPhase::VerifyingCheckpoint => {
                matches!(target, SyncPhase::Downloading | SyncPhase::Failed)
            }
            SyncPhase::Downloading => matches!(target, SyncPhase::Committing | SyncPhase::Failed),
            SyncPhase::Committing => matches!(target, SyncPhase::Completed | SyncPhase::Failed),
            SyncPhase::Completed => false,
            SyncPhase::Failed => matches!(
                target,
                SyncPhase::VerifyingCheckpoint | SyncPhase::Downloading
            ),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Completed)
    }
}
