/// Class that is used to configure the detect-describe-associate tracker
#[derive(Debug, Clone)]
pub struct DdaOptions {
    update_description: bool,
    max_inactive_tracks: usize,
    seed: u64,
    max_spawn: usize,
}

impl DdaOptions {
    /// Matched tracks take the description of the feature they were matched with. When
    /// disabled, tracks keep the description of the feature they were spawned from.
    ///
    pub fn update_description(mut self, enabled: bool) -> Self {
        self.update_description = enabled;
        self
    }

    /// The maximum number of inactive tracks per feature set. The excess is dropped at
    /// random. `0` means unbounded.
    ///
    pub fn max_inactive_tracks(mut self, n: usize) -> Self {
        self.max_inactive_tracks = n;
        self
    }

    /// Seed of the generator choosing the inactive tracks to drop. The generator is
    /// re-seeded on reset, so runs over the same frames drop the same tracks.
    ///
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The maximum number of tracks spawned per feature set in a single spawn. `0` means
    /// unbounded.
    ///
    pub fn max_spawn(mut self, n: usize) -> Self {
        self.max_spawn = n;
        self
    }

    pub fn get_update_description(&self) -> bool {
        self.update_description
    }

    pub fn get_max_inactive_tracks(&self) -> usize {
        self.max_inactive_tracks
    }

    pub fn get_seed(&self) -> u64 {
        self.seed
    }

    pub fn get_max_spawn(&self) -> usize {
        self.max_spawn
    }
}

impl Default for DdaOptions {
    fn default() -> Self {
        Self {
            update_description: false,
            max_inactive_tracks: 500,
            seed: 0xDEAD_BEEF,
            max_spawn: 0,
        }
    }
}
