//! Seed management for the overlay
//!
//! Every random stream in the overlay (warp noise, base noise layers, fine noise,
//! bucket shuffling, per-interval crack scattering) gets its own seed derived from
//! the single configured seed. Derivation uses a fixed FNV-1a hash so results are
//! identical across runs, platforms and compiler versions.

/// Seeds for every overlay subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlaySeeds {
    /// Configured seed (used for display/reference)
    pub master: u32,
    /// Domain warp simplex fields
    pub warp: u32,
    /// Layered base noise (perlin + simplex per octave)
    pub base: u32,
    /// Fine detail noise used by the crack noise filter
    pub fine: u32,
    /// Random bucket selection shuffle
    pub selection: u64,
    /// Crack seed scattering
    pub cracks: u64,
}

impl OverlaySeeds {
    /// Derive all sub-seeds from the configured seed.
    pub fn from_master(master: u32) -> Self {
        let m = master as u64;
        Self {
            master,
            warp: derive_seed(m, "warp") as u32,
            base: derive_seed(m, "base") as u32,
            fine: derive_seed(m, "fine") as u32,
            selection: derive_seed(m, "selection"),
            cracks: derive_seed(m, "cracks"),
        }
    }
}

/// Derive a sub-seed from a master seed and a system name.
pub fn derive_seed(master: u64, system: &str) -> u64 {
    let mut hasher = SeedHasher::new();
    hasher.write_u64(master);
    hasher.write_bytes(system.as_bytes());
    hasher.finish()
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a hasher with a splitmix64 avalanche step. Output must stay identical
/// across releases and platforms.
#[derive(Clone, Copy, Debug)]
pub struct SeedHasher {
    state: u64,
}

impl SeedHasher {
    pub fn new() -> Self {
        Self { state: FNV_OFFSET }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.state ^= b as u64;
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Hash a float by its bit pattern (`-0.0` and `0.0` are folded together).
    pub fn write_f64(&mut self, value: f64) {
        let v = if value == 0.0 { 0.0 } else { value };
        self.write_u64(v.to_bits());
    }

    pub fn finish(&self) -> u64 {
        // splitmix64 finalizer
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
}

impl Default for SeedHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OverlaySeeds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "OverlaySeeds {{ master: {}, warp: {}, base: {}, fine: {}, selection: {}, cracks: {} }}",
            self.master, self.warp, self.base, self.fine, self.selection, self.cracks,
        )
    }
}
