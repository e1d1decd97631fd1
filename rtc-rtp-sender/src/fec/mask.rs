use super::FecMaskType;

/// Largest protected set for which bursty masks are used.
pub const MAX_BURSTY_MEDIA_PACKETS: usize = 12;

/// Builds one protection mask per FEC packet. Bit `i` of a mask is set when
/// the FEC packet covers media packet `i` of the protected set.
///
/// Random masks split the media packets into contiguous groups, one per FEC
/// packet. Bursty masks interleave, so that a run of consecutive losses hits
/// as many different FEC packets as possible.
///
/// With unequal protection the first `num_important` packets get
/// `ceil(num_fec * num_important / num_media)` extra rows of their own,
/// while the remaining rows cover the whole set.
pub fn generate_masks(
    num_media: usize,
    num_fec: usize,
    num_important: usize,
    use_uep: bool,
    mask_type: FecMaskType,
) -> Vec<u64> {
    if num_media == 0 || num_fec == 0 {
        return vec![];
    }
    let num_media = num_media.min(64);
    let num_fec = num_fec.min(num_media);

    let mask_type = if num_media > MAX_BURSTY_MEDIA_PACKETS {
        FecMaskType::Random
    } else {
        mask_type
    };

    let num_important = num_important.min(num_media);
    if !use_uep || num_important == 0 || num_important == num_media || num_fec < 2 {
        return spread(num_media, num_fec, mask_type);
    }

    let num_fec_important = (num_fec * num_important)
        .div_ceil(num_media)
        .clamp(1, (num_fec - 1).min(num_important));

    let mut masks = spread(num_important, num_fec_important, mask_type);
    masks.extend(spread(num_media, num_fec - num_fec_important, mask_type));
    masks
}

fn spread(count: usize, rows: usize, mask_type: FecMaskType) -> Vec<u64> {
    let mut masks = vec![0u64; rows];
    for i in 0..count {
        let row = match mask_type {
            FecMaskType::Random => i * rows / count,
            FecMaskType::Bursty => i % rows,
        };
        masks[row] |= 1 << i;
    }
    masks
}
