use crate::sim::events::VehicleEvent;
use crate::vehicle::control::UserCommand;
use crate::vehicle::entity::EntityInput;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

// ---------------------------------------------
// WHAT THE NETWORK SIDE HANDS THE TICK LOOP
// ---------------------------------------------
#[derive(Debug, Default)]
pub struct TickInputs {
    pub joins: Vec<String>,
    pub leaves: Vec<String>,
    pub commands: HashMap<String, UserCommand>,
    pub entity_inputs: Vec<(String, EntityInput)>,
    pub flush_scripts: bool,
}

// ---------------------------------------------
// SNAPSHOTS
// ---------------------------------------------
#[derive(Debug, Clone, Serialize)]
pub struct PoseValue {
    pub name: &'static str,
    pub value: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleSnapshot {
    pub id: String,
    pub position: [f32; 3],
    pub rotation: [f32; 4],         // quaternion x, y, z, w
    pub speed: f32,                 // mph, signed
    pub rpm: f32,
    pub gear: i32,
    pub boost_remaining: f32,
    pub engine_on: bool,
    pub audio_state: String,
    pub poses: Vec<PoseValue>,
    pub events: Vec<VehicleEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub tick: u64,
    pub vehicles: Vec<VehicleSnapshot>,
}

// ---------------------------------------------
// STATE SHARED BETWEEN SOCKET TASKS AND THE TICK LOOP
// ---------------------------------------------
#[derive(Default)]
pub struct SharedGameState {
    pub tick: u64,
    clients: HashMap<String, UnboundedSender<String>>,
    pending: TickInputs,
}

impl SharedGameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// New connection: remember its outgoing channel and queue a vehicle.
    pub fn register_client(&mut self, player_id: &str, tx: UnboundedSender<String>) {
        self.clients.insert(player_id.to_string(), tx);
        self.pending.joins.push(player_id.to_string());
    }

    pub fn remove_client(&mut self, player_id: &str) {
        if self.clients.remove(player_id).is_some() {
            self.pending.commands.remove(player_id);
            self.pending.leaves.push(player_id.to_string());
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Latest command wins; older unprocessed commands are dropped.
    pub fn update_input(&mut self, player_id: &str, cmd: UserCommand) {
        if self.clients.contains_key(player_id) {
            self.pending.commands.insert(player_id.to_string(), cmd);
        }
    }

    pub fn queue_entity_input(&mut self, player_id: &str, input: EntityInput) {
        if self.clients.contains_key(player_id) {
            self.pending.entity_inputs.push((player_id.to_string(), input));
        }
    }

    pub fn request_script_flush(&mut self) {
        self.pending.flush_scripts = true;
    }

    /// Everything queued since the last tick.
    pub fn take_inputs(&mut self) -> TickInputs {
        std::mem::take(&mut self.pending)
    }

    /// Send a snapshot to every client. Clients whose channel closed are
    /// dropped.
    pub fn broadcast_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), serde_json::Error> {
        let json = serde_json::to_string(snapshot)?;
        self.tick = snapshot.tick;
        self.clients.retain(|_, tx| tx.send(json.clone()).is_ok());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn inputs_are_drained_once() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut state = SharedGameState::new();
        state.register_client("p1", tx);
        state.update_input("p1", UserCommand { forward_move: 100.0, ..UserCommand::default() });
        state.update_input("p1", UserCommand { forward_move: 400.0, ..UserCommand::default() });
        state.update_input("ghost", UserCommand::default());
        state.queue_entity_input("p1", EntityInput::TurnOn);
        state.request_script_flush();

        let inputs = state.take_inputs();
        assert_eq!(inputs.joins, vec!["p1".to_string()]);
        assert_eq!(inputs.commands.len(), 1);
        assert_eq!(inputs.commands["p1"].forward_move, 400.0);
        assert_eq!(inputs.entity_inputs, vec![("p1".to_string(), EntityInput::TurnOn)]);
        assert!(inputs.flush_scripts);

        let again = state.take_inputs();
        assert!(again.joins.is_empty() && again.commands.is_empty() && !again.flush_scripts);
    }

    #[test]
    fn broadcast_reaches_clients_and_drops_closed_ones() {
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        let mut state = SharedGameState::new();
        state.register_client("p1", tx1);
        state.register_client("p2", tx2);
        drop(rx2);

        state
            .broadcast_snapshot(&Snapshot { tick: 7, vehicles: Vec::new() })
            .unwrap();
        assert_eq!(rx1.try_recv().unwrap(), r#"{"tick":7,"vehicles":[]}"#);
        assert_eq!(state.client_count(), 1);
        assert_eq!(state.tick, 7);
    }

    #[test]
    fn leaving_queues_removal() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut state = SharedGameState::new();
        state.register_client("p1", tx);
        state.take_inputs();
        state.remove_client("p1");
        state.remove_client("p1");
        assert_eq!(state.take_inputs().leaves, vec!["p1".to_string()]);
    }
}
