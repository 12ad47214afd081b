use std::collections::HashMap;

// ---------------------------------------------
// SPAWN RESULT RETURNED TO THE GAME LOOP
// ---------------------------------------------
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSpawnInfo {
    pub player_id: String,
    pub spawn_index: usize,
    pub position: [f32; 3],
}

// ---------------------------------------------
// SPAWN MANAGER
// ---------------------------------------------
#[derive(Debug)]
pub struct SpawnManager {
    /// Configured spawn positions.
    points: Vec<[f32; 3]>,

    /// How many live players were placed at each spawn point.
    occupancy: Vec<usize>,

    /// Which spawn point each player got.
    assigned: HashMap<String, usize>,
}

impl SpawnManager {
    pub fn new(points: Vec<[f32; 3]>) -> Self {
        let points = if points.is_empty() {
            vec![[0.0, 1.5, 0.0]]
        } else {
            points
        };
        Self {
            occupancy: vec![0; points.len()],
            points,
            assigned: HashMap::new(),
        }
    }

    // ---------------------------------------------------------
    // Least-used spawn point, lowest index on ties
    // ---------------------------------------------------------
    fn choose_point(&self) -> usize {
        self.occupancy
            .iter()
            .enumerate()
            .min_by_key(|(i, count)| (**count, *i))
            .map_or(0, |(i, _)| i)
    }

    // ---------------------------------------------------------
    // Full allocation pipeline called from the game loop
    // ---------------------------------------------------------
    pub fn allocate_spawn(&mut self, player_id: &str) -> PlayerSpawnInfo {
        if let Some(&index) = self.assigned.get(player_id) {
            return PlayerSpawnInfo {
                player_id: player_id.to_string(),
                spawn_index: index,
                position: self.points[index],
            };
        }

        let index = self.choose_point();
        self.occupancy[index] += 1;
        self.assigned.insert(player_id.to_string(), index);

        PlayerSpawnInfo {
            player_id: player_id.to_string(),
            spawn_index: index,
            position: self.points[index],
        }
    }

    pub fn release(&mut self, player_id: &str) {
        if let Some(index) = self.assigned.remove(player_id) {
            self.occupancy[index] = self.occupancy[index].saturating_sub(1);
        }
    }
}
