//! Text rendering of the panel state

use meshfs_bridge::UiState;

/// Render a state snapshot as status line plus peer list
pub fn render_state(state: &UiState) -> String {
    let mut out = format!("Status: {}", state.status);

    if state.peers.is_empty() {
        out.push_str("\nPeers: none");
    } else {
        out.push_str(&format!("\nPeers ({}):", state.peers.len()));
        for peer in &state.peers {
            out.push_str(&format!("\n  {}", peer));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshfs_bridge::PeerStatus;
    use meshfs_protocol::PeerEndpoint;

    #[test]
    fn test_render_initial() {
        assert_eq!(
            render_state(&UiState::default()),
            "Status: Not Started\nPeers: none"
        );
    }

    #[test]
    fn test_render_running_with_peers() {
        let state = UiState {
            status: PeerStatus::Running { port: 65435 },
            peers: vec![
                PeerEndpoint::new("10.0.0.2", 5000),
                PeerEndpoint::new("10.0.0.3", 5001),
            ],
        };
        assert_eq!(
            render_state(&state),
            "Status: Running on port 65435\nPeers (2):\n  10.0.0.2:5000\n  10.0.0.3:5001"
        );
    }

    #[test]
    fn test_render_error() {
        let state = UiState {
            status: PeerStatus::Error {
                message: "Peer not started.".into(),
            },
            peers: Vec::new(),
        };
        assert!(render_state(&state).starts_with("Status: Error: Peer not started."));
    }
}
