//! Round-robin cursor over the resources a token grants.

/// Cyclic cursor over resource names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceCycle {
    resources: Vec<String>,
    cursor: usize,
}

impl ResourceCycle {
    pub fn new(resources: Vec<String>) -> Self {
        Self {
            resources,
            cursor: 0,
        }
    }

    /// Switch to `resources`. The cursor survives only if the list is
    /// unchanged.
    pub fn retarget(&mut self, resources: Vec<String>) {
        if resources != self.resources {
            self.resources = resources;
            self.cursor = 0;
        }
    }

    /// Resource at the cursor, advancing it. `None` for an empty list.
    pub fn next_resource(&mut self) -> Option<String> {
        if self.resources.is_empty() {
            return None;
        }
        let resource = self.resources[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.resources.len();
        Some(resource)
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}
