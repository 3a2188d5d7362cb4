use serde::{Deserialize, Deserializer, Serialize};

/// Phase of the offline update flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateState {
    /// Startup; no decision made yet.
    Init,
    /// Installed content is up to date.
    Nothing,
    /// The worker is invalidating the offline cache.
    Clearing,
    /// A newer version is known but not fetched.
    UpdateAvailable,
    Downloading,
    Unpacking,
    Cleaning,
}

impl UpdateState {
    pub const ALL: [UpdateState; 7] = [
        UpdateState::Init,
        UpdateState::Nothing,
        UpdateState::Clearing,
        UpdateState::UpdateAvailable,
        UpdateState::Downloading,
        UpdateState::Unpacking,
        UpdateState::Cleaning,
    ];

    /// Whether entering this state means an install is underway.
    pub fn marks_updating(self) -> bool {
        matches!(
            self,
            UpdateState::Clearing | UpdateState::Downloading | UpdateState::Unpacking
        )
    }

    /// States in which an update check is allowed to run.
    pub fn is_idle(self) -> bool {
        matches!(self, UpdateState::Init | UpdateState::Nothing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UpdateState::Init => "init",
            UpdateState::Nothing => "nothing",
            UpdateState::Clearing => "clearing",
            UpdateState::UpdateAvailable => "updateAvailable",
            UpdateState::Downloading => "downloading",
            UpdateState::Unpacking => "unpacking",
            UpdateState::Cleaning => "cleaning",
        }
    }
}

impl std::fmt::Display for UpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the update flow as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatus {
    /// `-1` when unknown, otherwise 0..=100.
    pub progress: i32,
    pub state: UpdateState,
    pub current_version: Option<String>,
    pub current_date: Option<String>,
    pub update_version: Option<String>,
    pub update_date: Option<String>,
}

impl Default for UpdateStatus {
    fn default() -> Self {
        Self {
            progress: -1,
            state: UpdateState::Init,
            current_version: None,
            current_date: None,
            update_version: None,
            update_date: None,
        }
    }
}

/// Partial status update, as posted by the worker.
///
/// The outer `Option` of the version/date fields tracks presence: an explicit
/// `null` clears the value, an absent field leaves it alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<UpdateState>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_version: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_date: Option<Option<String>>,
}

impl StatusPatch {
    pub fn state(state: UpdateState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: i32) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_current(mut self, version: Option<String>, date: Option<String>) -> Self {
        self.current_version = Some(version);
        self.current_date = Some(date);
        self
    }
}

/// Deserialize a field that was present in the input, keeping `null` as `Some(None)`.
pub(crate) fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_match_wire_format() {
        for state in UpdateState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
            let back: UpdateState = serde_json::from_str(&json).unwrap();
            assert_eq!(back, state);
        }
    }

    #[test]
    fn only_install_phases_mark_updating() {
        let updating: Vec<_> = UpdateState::ALL
            .into_iter()
            .filter(|state| state.marks_updating())
            .collect();
        assert_eq!(
            updating,
            vec![
                UpdateState::Clearing,
                UpdateState::Downloading,
                UpdateState::Unpacking
            ]
        );
    }

    #[test]
    fn patch_distinguishes_null_from_absent() {
        let absent: StatusPatch = serde_json::from_str(r#"{"progress": 40}"#).unwrap();
        assert_eq!(absent.progress, Some(40));
        assert_eq!(absent.current_version, None);

        let cleared: StatusPatch =
            serde_json::from_str(r#"{"currentVersion": null, "currentDate": "2024-01-01"}"#)
                .unwrap();
        assert_eq!(cleared.current_version, Some(None));
        assert_eq!(cleared.current_date, Some(Some("2024-01-01".into())));
    }

    #[test]
    fn unknown_state_is_rejected() {
        let result = serde_json::from_str::<StatusPatch>(r#"{"state": "exploding"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn default_status_starts_in_init_with_unknown_progress() {
        let status = UpdateStatus::default();
        assert_eq!(status.state, UpdateState::Init);
        assert_eq!(status.progress, -1);
    }
}
