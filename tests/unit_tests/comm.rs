use std::thread;
use substruct::assembly::local::Entity;
use substruct::comm::{Communicator, SerialComm, Tag, ThreadGroup};

fn tag(id: usize, slot: usize) -> Tag {
    Tag::new(Entity::vertex(id), slot)
}

#[test]
fn serial_sum_merges_duplicate_tags() {
    let comm = SerialComm;
    let tags = [tag(0, 0), tag(1, 0), tag(0, 0), tag(0, 1)];
    let mut values = [1.0, 2.0, 3.0, 4.0];
    comm.sum_by_tag(&tags, &mut values);
    assert_eq!(values, [4.0, 2.0, 4.0, 4.0]);

    let mut dense = [1.5, -2.0];
    comm.sum_all(&mut dense);
    assert_eq!(dense, [1.5, -2.0]);
    assert_eq!((comm.rank(), comm.size()), (0, 1));
}

#[test]
fn thread_group_sums_over_all_ranks() {
    // Rank r holds the tags in a different order and sometimes not at all
    let local_tags = vec![
        vec![tag(0, 0), tag(1, 0), tag(2, 0)],
        vec![tag(2, 0), tag(0, 0)],
        vec![tag(1, 0), tag(3, 0), tag(0, 0)],
    ];
    let results: Vec<Vec<f64>> = thread::scope(|scope| {
        let handles: Vec<_> = ThreadGroup::new(3)
            .into_communicators()
            .into_iter()
            .zip(&local_tags)
            .map(|(comm, tags)| {
                scope.spawn(move || {
                    let rank = comm.rank() as f64;
                    let mut values: Vec<f64> = (0..tags.len()).map(|i| 0.1 * (rank + 1.0) + i as f64).collect();
                    comm.sum_by_tag(tags, &mut values);

                    let mut dense = vec![rank, 1.0];
                    comm.sum_all(&mut dense);
                    assert_eq!(dense, vec![3.0, 3.0]);
                    values
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // tag 0: 0.1 + 1.2 + 2.3, tag 1: 1.1 + 0.3, tag 2: 2.1 + 0.2, tag 3: 1.3
    let tag0 = results[0][0];
    assert!((tag0 - 3.6).abs() < 1e-14);
    assert!((results[0][1] - 1.4).abs() < 1e-14);
    assert!((results[0][2] - 2.3).abs() < 1e-14);
    assert!((results[2][1] - 1.3).abs() < 1e-14);

    // Every rank obtains bitwise identical sums
    assert_eq!(results[1][1].to_bits(), tag0.to_bits());
    assert_eq!(results[2][2].to_bits(), tag0.to_bits());
    assert_eq!(results[1][0].to_bits(), results[0][2].to_bits());
}

#[test]
fn thread_group_supports_repeated_collectives() {
    let sums: Vec<f64> = thread::scope(|scope| {
        let handles: Vec<_> = ThreadGroup::new(2)
            .into_communicators()
            .into_iter()
            .map(|comm| {
                scope.spawn(move || {
                    let mut total = 0.0;
                    for i in 0..50 {
                        let mut value = [(comm.rank() + i) as f64];
                        comm.sum_all(&mut value);
                        total += value[0];
                    }
                    total
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    // Σ_i (i + (1 + i)) for i < 50
    assert_eq!(sums, vec![2500.0, 2500.0]);
}

/// Runs one closure per rank and reports which ranks panicked.
fn ranks_that_panicked(size: usize, f: impl Fn(&dyn Communicator) + Sync) -> Vec<bool> {
    thread::scope(|scope| {
        let handles: Vec<_> = ThreadGroup::new(size)
            .into_communicators()
            .into_iter()
            .map(|comm| {
                let f = &f;
                scope.spawn(move || f(&comm))
            })
            .collect();
        handles.into_iter().map(|h| h.join().is_err()).collect()
    })
}

#[test]
fn mismatched_collectives_fail_on_every_rank() {
    let panicked = ranks_that_panicked(2, |comm| {
        let mut values = [1.0];
        if comm.rank() == 0 {
            comm.sum_all(&mut values);
        } else {
            comm.sum_by_tag(&[tag(0, 0)], &mut values);
        }
    });
    assert_eq!(panicked, vec![true, true]);

    let panicked = ranks_that_panicked(3, |comm| {
        let mut values = vec![1.0; comm.rank() + 1];
        comm.sum_all(&mut values);
    });
    assert_eq!(panicked, vec![true, true, true]);
}
