// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Derivation of the short-term reference picture sets (7.4.8).
//!
//! Predicted sets refer to a set with a lower index. Sets are derived in index
//! order so the source set is always available in its derived form and
//! nothing ever needs to walk back through the prediction chain.

use thiserror::Error;

use crate::codec::h265::params::ShortTermRefPicSet;
use crate::codec::h265::params::MAX_DELTA_POCS;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpsError {
    #[error("st_ref_pic_set({0}) cannot be predicted, there is no set before it")]
    PredictionAtIndexZero(usize),
    #[error("st_ref_pic_set({idx}) references RefRpsIdx {ref_idx}")]
    InvalidRefRpsIdx { idx: usize, ref_idx: isize },
    #[error("st_ref_pic_set({0}) is in the SPS but has delta_idx_minus1 != 0")]
    DeltaIdxInSps(usize),
    #[error("st_ref_pic_set({idx}) has {count} entries, at most 16 are supported")]
    TooManyPictures { idx: usize, count: usize },
}

impl RpsError {
    /// Whether the error is about a fixed table size rather than a reference
    /// to something that does not exist.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::TooManyPictures { .. })
    }
}

pub type RpsResult<T> = Result<T, RpsError>;

/// The variables derived from one `st_ref_pic_set(stRpsIdx)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DerivedRefPicSet {
    pub num_negative_pics: usize,
    pub num_positive_pics: usize,
    pub delta_poc_s0: [i32; MAX_DELTA_POCS],
    pub used_by_curr_pic_s0: [bool; MAX_DELTA_POCS],
    pub delta_poc_s1: [i32; MAX_DELTA_POCS],
    pub used_by_curr_pic_s1: [bool; MAX_DELTA_POCS],
}

impl DerivedRefPicSet {
    /// NumDeltaPocs (7-71).
    pub fn num_delta_pocs(&self) -> usize {
        self.num_negative_pics + self.num_positive_pics
    }

    /// The short-term contribution to NumPicTotalCurr.
    pub fn num_used_by_curr_pic(&self) -> u32 {
        let s0 = &self.used_by_curr_pic_s0[..self.num_negative_pics];
        let s1 = &self.used_by_curr_pic_s1[..self.num_positive_pics];
        s0.iter().chain(s1).filter(|&&used| used).count() as u32
    }

    fn push_s0(&mut self, idx: usize, delta_poc: i32, used: bool) -> RpsResult<()> {
        let i = self.num_negative_pics;
        if i >= MAX_DELTA_POCS {
            return Err(RpsError::TooManyPictures {
                idx,
                count: i + 1,
            });
        }

        self.delta_poc_s0[i] = delta_poc;
        self.used_by_curr_pic_s0[i] = used;
        self.num_negative_pics += 1;
        Ok(())
    }

    fn push_s1(&mut self, idx: usize, delta_poc: i32, used: bool) -> RpsResult<()> {
        let i = self.num_positive_pics;
        if i >= MAX_DELTA_POCS {
            return Err(RpsError::TooManyPictures {
                idx,
                count: i + 1,
            });
        }

        self.delta_poc_s1[i] = delta_poc;
        self.used_by_curr_pic_s1[i] = used;
        self.num_positive_pics += 1;
        Ok(())
    }
}

/// RefRpsIdx (7-59) of the set at `idx`, for a table with `num_sps_sets`
/// sets in the SPS. Only the set coded in a slice header, at index
/// `num_sps_sets`, may use `delta_idx_minus1`.
pub fn ref_rps_idx(set: &ShortTermRefPicSet, idx: usize, num_sps_sets: usize) -> RpsResult<usize> {
    if idx == 0 {
        return Err(RpsError::PredictionAtIndexZero(idx));
    }

    let delta_idx = if idx == num_sps_sets {
        usize::from(set.delta_idx_minus1) + 1
    } else if set.delta_idx_minus1 != 0 {
        return Err(RpsError::DeltaIdxInSps(idx));
    } else {
        1
    };

    idx.checked_sub(delta_idx)
        .ok_or(RpsError::InvalidRefRpsIdx {
            idx,
            ref_idx: idx as isize - delta_idx as isize,
        })
}

/// Derives the set at `idx` given the already derived sets `0..idx`.
pub fn derive_ref_pic_set(
    set: &ShortTermRefPicSet,
    idx: usize,
    num_sps_sets: usize,
    derived: &[DerivedRefPicSet],
) -> RpsResult<DerivedRefPicSet> {
    let mut rps = DerivedRefPicSet::default();

    if idx != 0 && set.inter_ref_pic_set_prediction_flag {
        let ref_idx = ref_rps_idx(set, idx, num_sps_sets)?;
        let src = derived.get(ref_idx).ok_or(RpsError::InvalidRefRpsIdx {
            idx,
            ref_idx: ref_idx as isize,
        })?;

        let delta_rps = set.delta_rps();
        let num_delta_pocs = src.num_delta_pocs();
        // use_delta_flag is inferred to be 1 when not coded.
        let use_delta = |j: usize| set.used_by_curr_pic_flag[j] || set.use_delta_flag[j];

        // 7-61
        for j in (0..src.num_positive_pics).rev() {
            let d_poc = src.delta_poc_s1[j] + delta_rps;
            let k = src.num_negative_pics + j;
            if d_poc < 0 && use_delta(k) {
                rps.push_s0(idx, d_poc, set.used_by_curr_pic_flag[k])?;
            }
        }
        if delta_rps < 0 && use_delta(num_delta_pocs) {
            rps.push_s0(idx, delta_rps, set.used_by_curr_pic_flag[num_delta_pocs])?;
        }
        for j in 0..src.num_negative_pics {
            let d_poc = src.delta_poc_s0[j] + delta_rps;
            if d_poc < 0 && use_delta(j) {
                rps.push_s0(idx, d_poc, set.used_by_curr_pic_flag[j])?;
            }
        }

        // 7-62
        for j in (0..src.num_negative_pics).rev() {
            let d_poc = src.delta_poc_s0[j] + delta_rps;
            if d_poc > 0 && use_delta(j) {
                rps.push_s1(idx, d_poc, set.used_by_curr_pic_flag[j])?;
            }
        }
        if delta_rps > 0 && use_delta(num_delta_pocs) {
            rps.push_s1(idx, delta_rps, set.used_by_curr_pic_flag[num_delta_pocs])?;
        }
        for j in 0..src.num_positive_pics {
            let d_poc = src.delta_poc_s1[j] + delta_rps;
            let k = src.num_negative_pics + j;
            if d_poc > 0 && use_delta(k) {
                rps.push_s1(idx, d_poc, set.used_by_curr_pic_flag[k])?;
            }
        }

        if rps.num_delta_pocs() > MAX_DELTA_POCS {
            return Err(RpsError::TooManyPictures {
                idx,
                count: rps.num_delta_pocs(),
            });
        }
    } else {
        let num_negative = usize::from(set.num_negative_pics);
        let num_positive = usize::from(set.num_positive_pics);
        if num_negative + num_positive > MAX_DELTA_POCS {
            return Err(RpsError::TooManyPictures {
                idx,
                count: num_negative + num_positive,
            });
        }

        // 7-63 and 7-64
        let mut poc = 0;
        for i in 0..num_negative {
            poc -= i32::from(set.delta_poc_s0_minus1[i]) + 1;
            rps.push_s0(idx, poc, set.used_by_curr_pic_s0_flag[i])?;
        }

        let mut poc = 0;
        for i in 0..num_positive {
            poc += i32::from(set.delta_poc_s1_minus1[i]) + 1;
            rps.push_s1(idx, poc, set.used_by_curr_pic_s1_flag[i])?;
        }
    }

    Ok(rps)
}

/// Derives all the candidate sets of an SPS.
pub fn derive_ref_pic_sets(sets: &[ShortTermRefPicSet]) -> RpsResult<Vec<DerivedRefPicSet>> {
    let mut derived = Vec::with_capacity(sets.len() + 1);

    for (idx, set) in sets.iter().enumerate() {
        let rps = derive_ref_pic_set(set, idx, sets.len(), &derived)?;
        derived.push(rps);
    }

    Ok(derived)
}
