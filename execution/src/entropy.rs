//! Randomness capability for winner selection.
//!
//! Every random draw the selector makes goes through [`Entropy`], so the source
//! is chosen by whoever constructs the engine. Production settlement uses
//! [`SystemEntropy`], backed by the operating system CSPRNG, which leaves no
//! in-process generator state for anyone to observe or reconstruct.

use rand::rngs::OsRng;
use rand::Rng;

pub trait Entropy {
    /// Uniform integer in `0..bound`. `bound` must be nonzero.
    fn below(&mut self, bound: u32) -> u32;

    /// Uniformly pick one element of a non-empty slice.
    fn pick<T: Copy>(&mut self, items: &[T]) -> T
    where
        Self: Sized,
    {
        items[self.below(items.len() as u32) as usize]
    }

    /// Fisher-Yates shuffle driven by this source.
    fn shuffle<T>(&mut self, items: &mut [T])
    where
        Self: Sized,
    {
        for idx in (1..items.len()).rev() {
            let swap = self.below(idx as u32 + 1) as usize;
            items.swap(idx, swap);
        }
    }
}

/// Operating system CSPRNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemEntropy;

impl Entropy for SystemEntropy {
    fn below(&mut self, bound: u32) -> u32 {
        OsRng.gen_range(0..bound)
    }
}

impl<E: Entropy + ?Sized> Entropy for &mut E {
    fn below(&mut self, bound: u32) -> u32 {
        (**self).below(bound)
    }
}
