//! Synthetic paired-feature data loader
//!
//! Produces image features drawn uniformly from `[-1, 1]` and text features
//! that copy them with additive noise, so matching pairs are the most
//! similar ones. Generation is deterministic in the config seed; the train
//! split is reshuffled every epoch with a seed derived from the epoch.

use crate::config::DataConfig;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;
use vl_core::{Batch, Config, DataLoader, DataLoaders, Epoch, Error, Result};

/// In-memory loader over generated pairs
#[derive(Debug, Clone)]
pub struct SyntheticClipLoader {
    images: Vec<Vec<f32>>,
    texts: Vec<Vec<f32>>,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
}

impl SyntheticClipLoader {
    pub fn generate(
        samples: usize,
        dim: usize,
        noise: f32,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
    ) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut images = Vec::with_capacity(samples);
        let mut texts = Vec::with_capacity(samples);

        for _ in 0..samples {
            let image: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..=1.0)).collect();
            let text = image
                .iter()
                .map(|&x| x + noise * rng.gen_range(-1.0f32..=1.0))
                .collect();
            images.push(image);
            texts.push(text);
        }

        Self {
            images,
            texts,
            batch_size: batch_size.max(1),
            shuffle,
            seed,
        }
    }

    fn order(&self, epoch: Epoch) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.images.len()).collect();
        if self.shuffle {
            let epoch_seed = self.seed.wrapping_add(epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15));
            let mut rng = ChaCha8Rng::seed_from_u64(epoch_seed);
            order.shuffle(&mut rng);
        }
        order
    }

    fn gather(&self, indices: &[usize]) -> Batch {
        Batch::new(
            indices.iter().map(|&i| self.images[i].clone()).collect(),
            indices.iter().map(|&i| self.texts[i].clone()).collect(),
        )
    }
}

impl DataLoader for SyntheticClipLoader {
    fn len(&self) -> usize {
        self.images.len().div_ceil(self.batch_size)
    }

    fn num_samples(&self) -> usize {
        self.images.len()
    }

    fn batches(&self, epoch: Epoch) -> Box<dyn Iterator<Item = Batch> + '_> {
        let order = self.order(epoch);
        let chunks: Vec<Vec<usize>> = order
            .chunks(self.batch_size)
            .map(<[usize]>::to_vec)
            .collect();
        Box::new(chunks.into_iter().map(move |indices| self.gather(&indices)))
    }
}

/// Data-loader factory: a shuffled `train` split and an ordered `val` split
pub fn build_synthetic_loaders(cfg: &Config) -> Result<DataLoaders> {
    let data: DataConfig = cfg.section("data")?;
    let dim = cfg.get_u64("model.embed_dim")? as usize;
    let seed = cfg.get_u64("seed")?;

    if data.train_samples == 0 {
        return Err(Error::InvalidConfig {
            message: "data.train_samples must be positive".to_string(),
        });
    }

    let mut loaders = DataLoaders::new();
    loaders.insert(
        "train".to_string(),
        Box::new(SyntheticClipLoader::generate(
            data.train_samples,
            dim,
            data.noise,
            data.batch_size,
            true,
            seed,
        )),
    );
    if data.val_samples > 0 {
        loaders.insert(
            "val".to_string(),
            Box::new(SyntheticClipLoader::generate(
                data.val_samples,
                dim,
                data.noise,
                data.batch_size,
                false,
                seed.wrapping_add(1),
            )),
        );
    }

    debug!(
        splits = ?loaders.keys().collect::<Vec<_>>(),
        train_samples = data.train_samples,
        val_samples = data.val_samples,
        "Built synthetic loaders"
    );
    Ok(loaders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::task_cfg_init_fn;

    #[test]
    fn test_partial_last_batch() {
        let loader = SyntheticClipLoader::generate(10, 4, 0.1, 4, false, 7);
        assert_eq!(loader.len(), 3);

        let sizes: Vec<usize> = loader.batches(0).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_deterministic_generation() {
        let a = SyntheticClipLoader::generate(8, 3, 0.1, 4, true, 42);
        let b = SyntheticClipLoader::generate(8, 3, 0.1, 4, true, 42);
        let first_a: Vec<Batch> = a.batches(1).collect();
        let first_b: Vec<Batch> = b.batches(1).collect();
        assert_eq!(first_a, first_b);
    }

    #[test]
    fn test_epoch_reshuffles_same_samples() {
        let loader = SyntheticClipLoader::generate(32, 2, 0.0, 32, true, 3);
        let epoch0 = loader.batches(0).next().unwrap();
        let epoch1 = loader.batches(1).next().unwrap();
        assert_ne!(epoch0.images, epoch1.images);

        let mut a = epoch0.images.clone();
        let mut b = epoch1.images.clone();
        a.sort_by(|x, y| x.partial_cmp(y).unwrap());
        b.sort_by(|x, y| x.partial_cmp(y).unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_factory_splits() {
        let mut cfg = task_cfg_init_fn();
        let loaders = build_synthetic_loaders(&cfg).unwrap();
        assert_eq!(loaders.keys().collect::<Vec<_>>(), vec!["train", "val"]);
        assert_eq!(loaders["train"].num_samples(), 256);
        assert_eq!(loaders["train"].len(), 8);

        cfg.merge_from_overrides(&["data.val_samples", "0"]).unwrap();
        let loaders = build_synthetic_loaders(&cfg).unwrap();
        assert!(!loaders.contains_key("val"));
    }
}
