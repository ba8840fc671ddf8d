pub const ETHASH_EPOCH_LENGTH: u64 = 30_000;
pub const ETHASH_CACHE_BYTES_INIT: u64 = 1 << 24;
pub const ETHASH_CACHE_BYTES_GROWTH: u64 = 1 << 17;
pub const ETHASH_DATASET_BYTES_INIT: u64 = 1 << 30;
pub const ETHASH_DATASET_BYTES_GROWTH: u64 = 1 << 23;
pub const ETHASH_HASH_BYTES: u64 = 64;
pub const ETHASH_MIX_BYTES: u64 = 128;
pub const ETHASH_CACHE_ROUNDS: usize = 3;

pub const NIGHTCAP_EPOCH_LENGTH: u64 = 4_000;
pub const NIGHTCAP_CACHE_BYTES_INIT: u64 = 1 << 22;
pub const NIGHTCAP_CACHE_BYTES_GROWTH: u64 = 1 << 15;
pub const NIGHTCAP_DATASET_BYTES_INIT: u64 = 1 << 28;
pub const NIGHTCAP_DATASET_BYTES_GROWTH: u64 = 1 << 21;
pub const NIGHTCAP_NODE_BYTES: u64 = 32;
pub const NIGHTCAP_MIX_BYTES: u64 = 64;
pub const NIGHTCAP_CACHE_ROUNDS: usize = 3;

/// Items handed to a single DAG build launch. Larger launches trip driver
/// watchdogs on display-attached GPUs.
pub const DAG_CHUNK_ITEMS: u64 = 1 << 21;

pub fn ethash_epoch(block_height: u64) -> u64 {
    block_height / ETHASH_EPOCH_LENGTH
}

/// Light cache size in bytes for an Ethash epoch.
pub fn ethash_cache_size(epoch: u64) -> u64 {
    prime_sized(
        ETHASH_CACHE_BYTES_INIT,
        ETHASH_CACHE_BYTES_GROWTH,
        epoch,
        ETHASH_HASH_BYTES,
    )
}

/// Full dataset size in bytes for an Ethash epoch.
pub fn ethash_dataset_size(epoch: u64) -> u64 {
    prime_sized(
        ETHASH_DATASET_BYTES_INIT,
        ETHASH_DATASET_BYTES_GROWTH,
        epoch,
        ETHASH_MIX_BYTES,
    )
}

pub fn nightcap_epoch(block_height: u64) -> u64 {
    block_height / NIGHTCAP_EPOCH_LENGTH
}

/// Nightcap sizes follow block height rather than an explicit epoch number.
pub fn nightcap_cache_size(block_height: u64) -> u64 {
    prime_sized(
        NIGHTCAP_CACHE_BYTES_INIT,
        NIGHTCAP_CACHE_BYTES_GROWTH,
        nightcap_epoch(block_height),
        NIGHTCAP_NODE_BYTES,
    )
}

pub fn nightcap_dataset_size(block_height: u64) -> u64 {
    prime_sized(
        NIGHTCAP_DATASET_BYTES_INIT,
        NIGHTCAP_DATASET_BYTES_GROWTH,
        nightcap_epoch(block_height),
        NIGHTCAP_MIX_BYTES,
    )
}

/// Splits `total_items` into launches of at most `chunk_items` items, as
/// `(start, count)` pairs. The last launch carries `total_items % chunk_items`
/// items when the total is not a multiple of the chunk.
pub fn dag_chunks(total_items: u64, chunk_items: u64) -> impl Iterator<Item = (u64, u64)> {
    let chunk_items = chunk_items.max(1);
    let full = total_items / chunk_items;
    let tail = total_items % chunk_items;
    (0..full)
        .map(move |idx| (idx * chunk_items, chunk_items))
        .chain((tail > 0).then_some((total_items - tail, tail)))
}

fn prime_sized(init: u64, growth: u64, epoch: u64, unit: u64) -> u64 {
    let mut size = init
        .saturating_add(growth.saturating_mul(epoch))
        .saturating_sub(unit);
    while size >= unit && !is_prime(size / unit) {
        size -= 2 * unit;
    }
    size
}

fn is_prime(value: u64) -> bool {
    if value < 2 {
        return false;
    }
    if value % 2 == 0 {
        return value == 2;
    }
    let mut divisor = 3u64;
    while divisor.saturating_mul(divisor) <= value {
        if value % divisor == 0 {
            return false;
        }
        divisor += 2;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ethash_sizes_match_published_table() {
        assert_eq!(ethash_cache_size(0), 16_776_896);
        assert_eq!(ethash_dataset_size(0), 1_073_739_904);
        assert_eq!(ethash_cache_size(1), 16_907_456);
        assert_eq!(ethash_dataset_size(1), 1_082_130_304);
        assert_eq!(ethash_cache_size(30), 20_709_184);
        assert_eq!(ethash_dataset_size(30), 1_325_397_376);
    }

    #[test]
    fn nightcap_sizes_step_per_height_epoch() {
        assert_eq!(nightcap_cache_size(0), 4_194_272);
        assert_eq!(nightcap_dataset_size(0), 268_435_264);
        assert_eq!(nightcap_cache_size(NIGHTCAP_EPOCH_LENGTH - 1), 4_194_272);
        assert_eq!(nightcap_cache_size(NIGHTCAP_EPOCH_LENGTH), 4_226_272);
        assert_eq!(nightcap_dataset_size(NIGHTCAP_EPOCH_LENGTH), 270_531_904);
    }

    #[test]
    fn sizes_are_whole_prime_item_counts() {
        for epoch in [0, 7, 100] {
            let cache = ethash_cache_size(epoch);
            assert_eq!(cache % ETHASH_HASH_BYTES, 0);
            assert!(is_prime(cache / ETHASH_HASH_BYTES));
            let dataset = ethash_dataset_size(epoch);
            assert_eq!(dataset % ETHASH_MIX_BYTES, 0);
            assert!(is_prime(dataset / ETHASH_MIX_BYTES));
        }
    }

    #[test]
    fn dag_chunks_cover_total_with_partial_tail() {
        let chunks: Vec<_> = dag_chunks(10, 4).collect();
        assert_eq!(chunks, vec![(0, 4), (4, 4), (8, 2)]);

        let exact: Vec<_> = dag_chunks(8, 4).collect();
        assert_eq!(exact, vec![(0, 4), (4, 4)]);

        let short: Vec<_> = dag_chunks(3, 4).collect();
        assert_eq!(short, vec![(0, 3)]);

        assert_eq!(dag_chunks(0, 4).count(), 0);
    }

    #[test]
    fn epoch_helpers_divide_height() {
        assert_eq!(ethash_epoch(29_999), 0);
        assert_eq!(ethash_epoch(30_000), 1);
        assert_eq!(nightcap_epoch(8_001), 2);
    }
}
