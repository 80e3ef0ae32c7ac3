use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::instructions::NavigationInstruction;

/// The most recent navigation instructions, newest last.
#[derive(Debug, Clone)]
pub struct InstructionHistory {
    max_entries: usize,
    entries: VecDeque<NavigationInstruction>,
    last_id: u64,
}

impl InstructionHistory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: VecDeque::new(),
            last_id: 0,
        }
    }

    /// Next instruction id: the current time in milliseconds, strictly increasing.
    pub fn next_id(&mut self) -> u64 {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.last_id = now_ms.max(self.last_id + 1);
        self.last_id
    }

    pub fn record(&mut self, instruction: NavigationInstruction) {
        debug!(
            "Instruction {} [{}]: {}",
            instruction.id, instruction.priority, instruction.text
        );
        self.last_id = self.last_id.max(instruction.id);
        self.entries.push_back(instruction);

        // Keep only recent history
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&NavigationInstruction> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NavigationInstruction> {
        self.entries.iter()
    }

    /// Highest priority first, newest first within a priority.
    pub fn sorted(&self) -> Vec<&NavigationInstruction> {
        let mut sorted: Vec<&NavigationInstruction> = self.entries.iter().collect();
        sorted.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        sorted
    }

    /// The instruction to show prominently.
    pub fn primary(&self) -> Option<&NavigationInstruction> {
        self.sorted().into_iter().next()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// "just now", "12s ago", "3m ago", "2h ago".
pub fn time_ago(timestamp: SystemTime, now: SystemTime) -> String {
    let elapsed = now.duration_since(timestamp).unwrap_or(Duration::ZERO).as_secs();
    if elapsed < 5 {
        "just now".to_string()
    } else if elapsed < 60 {
        format!("{}s ago", elapsed)
    } else if elapsed < 3600 {
        format!("{}m ago", elapsed / 60)
    } else {
        format!("{}h ago", elapsed / 3600)
    }
}
