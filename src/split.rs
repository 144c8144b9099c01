use std::collections::BTreeMap;

use crate::{
    error::{Error, Result},
    random::RandomState,
};

/// Identifiers and labels of one partition, kept in parallel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub identifiers: Vec<String>,
    pub labels: Vec<usize>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    fn push(&mut self, identifier: String, label: usize) {
        self.identifiers.push(identifier);
        self.labels.push(label);
    }
}

/// Splits labelled samples into `(train, validation)` so that every class keeps
/// roughly the same share in both.
///
/// The validation set holds `ceil(valid_fraction * n)` samples, distributed over
/// classes by largest remainder of their proportional share. Each class keeps at
/// least one sample on each side.
pub fn stratified_split(
    identifiers: &[String],
    labels: &[usize],
    valid_fraction: f64,
    rng: &mut RandomState,
) -> Result<(Partition, Partition)> {
    if identifiers.len() != labels.len() {
        return Err(Error::Split(format!(
            "{} identifiers but {} labels",
            identifiers.len(),
            labels.len()
        )));
    }
    if !(valid_fraction > 0.0 && valid_fraction < 1.0) {
        return Err(Error::Split(format!(
            "validation fraction must be in (0, 1), got {valid_fraction}"
        )));
    }

    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (index, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(index);
    }

    if let Some((class, members)) = by_class.iter().find(|(_, members)| members.len() < 2) {
        return Err(Error::Split(format!(
            "class {class} has {} member(s), at least 2 are needed",
            members.len()
        )));
    }

    let total = labels.len();
    let n_valid = (valid_fraction * total as f64).ceil() as usize;
    if n_valid < by_class.len() || total - n_valid < by_class.len() {
        return Err(Error::Split(format!(
            "{n_valid} validation samples cannot cover {} classes out of {total} samples",
            by_class.len()
        )));
    }

    let quotas = allocate(&by_class, n_valid, total);

    let mut train = Partition::default();
    let mut valid = Partition::default();

    for ((_, members), quota) in by_class.iter_mut().zip(quotas) {
        rng.shuffle(members);

        let (valid_members, train_members) = members.split_at(quota);
        for &index in valid_members {
            valid.push(identifiers[index].clone(), labels[index]);
        }
        for &index in train_members {
            train.push(identifiers[index].clone(), labels[index]);
        }
    }

    Ok((shuffled(train, rng), shuffled(valid, rng)))
}

fn allocate(by_class: &BTreeMap<usize, Vec<usize>>, n_valid: usize, total: usize) -> Vec<usize> {
    let shares: Vec<f64> = by_class
        .values()
        .map(|members| members.len() as f64 * n_valid as f64 / total as f64)
        .collect();

    let mut quotas: Vec<usize> = by_class
        .values()
        .zip(&shares)
        .map(|(members, share)| (share.floor() as usize).clamp(1, members.len() - 1))
        .collect();

    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|&a, &b| {
        let rem_a = shares[a] - shares[a].floor();
        let rem_b = shares[b] - shares[b].floor();
        rem_b.total_cmp(&rem_a).then(a.cmp(&b))
    });

    let sizes: Vec<usize> = by_class.values().map(Vec::len).collect();
    let mut assigned: usize = quotas.iter().sum();

    while assigned < n_valid {
        let before = assigned;
        for &class in &order {
            if assigned == n_valid {
                break;
            }
            if quotas[class] + 1 < sizes[class] {
                quotas[class] += 1;
                assigned += 1;
            }
        }
        if assigned == before {
            break;
        }
    }

    while assigned > n_valid {
        let before = assigned;
        for &class in order.iter().rev() {
            if assigned == n_valid {
                break;
            }
            if quotas[class] > 1 {
                quotas[class] -= 1;
                assigned -= 1;
            }
        }
        if assigned == before {
            break;
        }
    }

    quotas
}

fn shuffled(partition: Partition, rng: &mut RandomState) -> Partition {
    let order = rng.permutation(partition.len());

    let mut out = Partition::default();
    for index in order {
        out.push(partition.identifiers[index].clone(), partition.labels[index]);
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn samples(counts: &[usize]) -> (Vec<String>, Vec<usize>) {
        let mut identifiers = Vec::new();
        let mut labels = Vec::new();
        for (class, &count) in counts.iter().enumerate() {
            for i in 0..count {
                identifiers.push(format!("c{class}_{i}"));
                labels.push(class);
            }
        }
        (identifiers, labels)
    }

    fn count(partition: &Partition, class: usize) -> usize {
        partition.labels.iter().filter(|&&l| l == class).count()
    }

    #[test]
    fn balanced_classes_split_proportionally() {
        let (ids, labels) = samples(&[100, 100]);
        let (train, valid) =
            stratified_split(&ids, &labels, 0.1, &mut RandomState::new(1234)).unwrap();

        assert_eq!(valid.len(), 20);
        assert_eq!(train.len(), 180);
        for class in 0..2 {
            let n = count(&valid, class);
            assert!((9..=11).contains(&n), "class {class} got {n}");
        }
    }

    #[test]
    fn partitions_are_disjoint_and_cover_everything() {
        let (ids, labels) = samples(&[37, 12, 51]);
        let (train, valid) =
            stratified_split(&ids, &labels, 0.1, &mut RandomState::new(99)).unwrap();

        let train_ids: HashSet<_> = train.identifiers.iter().collect();
        let valid_ids: HashSet<_> = valid.identifiers.iter().collect();

        assert!(train_ids.is_disjoint(&valid_ids));
        assert_eq!(train_ids.len() + valid_ids.len(), ids.len());
        assert!(ids.iter().all(|id| train_ids.contains(id) || valid_ids.contains(id)));
    }

    #[test]
    fn labels_follow_their_identifiers() {
        let (ids, labels) = samples(&[10, 10]);
        let (train, valid) =
            stratified_split(&ids, &labels, 0.2, &mut RandomState::new(5)).unwrap();

        for partition in [&train, &valid] {
            for (id, label) in partition.identifiers.iter().zip(&partition.labels) {
                assert!(id.starts_with(&format!("c{label}_")));
            }
        }
    }

    #[test]
    fn same_seed_same_split() {
        let (ids, labels) = samples(&[30, 20]);
        let a = stratified_split(&ids, &labels, 0.1, &mut RandomState::new(1)).unwrap();
        let b = stratified_split(&ids, &labels, 0.1, &mut RandomState::new(1)).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn every_class_lands_in_both_partitions() {
        let (ids, labels) = samples(&[2, 2, 2, 40]);
        let (train, valid) =
            stratified_split(&ids, &labels, 0.1, &mut RandomState::new(3)).unwrap();

        for class in 0..4 {
            assert!(count(&train, class) >= 1);
            assert!(count(&valid, class) >= 1);
        }
        assert_eq!(valid.len(), 5);
    }

    #[test]
    fn singleton_class_is_rejected() {
        let (ids, labels) = samples(&[1, 10]);

        assert!(matches!(
            stratified_split(&ids, &labels, 0.1, &mut RandomState::new(0)),
            Err(Error::Split(_))
        ));
    }

    #[test]
    fn fraction_out_of_range_is_rejected() {
        let (ids, labels) = samples(&[10, 10]);

        for fraction in [0.0, 1.0, -0.5, f64::NAN] {
            assert!(stratified_split(&ids, &labels, fraction, &mut RandomState::new(0)).is_err());
        }
    }
}
