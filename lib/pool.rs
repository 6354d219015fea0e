//! Simple thread pool for evaluating batches of operator inner products.

use std::{ cell::Cell, sync::Arc, thread };
use crossbeam::channel;
use log::{ debug, trace };
use thiserror::Error;
use crate::{
    ComplexScalar,
    contract::{ ContractResult, operator_inner_product },
    mpo::MPO,
    mps::MPS,
};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to enqueue inner products: dead thread")]
    DeadThread,

    #[error("failed to enqueue inner products: closed sender channel")]
    ClosedSenderChannel,

    #[error("failed to receive inner product result: receiver error: {0}")]
    ClosedReceiverChannel(channel::RecvError),

    #[error("encountered receiver error from within a thread: receiver error: {0}")]
    WorkerReceiverError(channel::RecvError),
}
use PoolError::*;
pub type PoolResult<T> = Result<T, PoolError>;

/// A single `⟨χ|W|ψ⟩` evaluation, as `(chi, op, psi)`.
pub type Job<A> = (Arc<MPS<A>>, Arc<MPO<A>>, Arc<MPS<A>>);

#[derive(Clone, Debug)]
enum ToWorker<A> {
    Stop,
    // (batch, index within batch, job)
    Work(u64, usize, Job<A>),
}

#[derive(Debug)]
enum FromWorker<A> {
    RecvError(channel::RecvError),
    Output(u64, usize, ContractResult<A>),
}

/// A simple thread pool to evaluate many [`operator_inner_product`]s in
/// parallel.
///
/// Workload between threads is automatically balanced by means of a
/// single-producer, multiple-consumer channel. Each job is tagged with its
/// position in the batch so that results are returned in submission order
/// regardless of which worker finishes first, and each batch is numbered so
/// that results left over from an earlier, failed batch are never mixed into a
/// later one. Inputs are shared with the workers through [`Arc`]s, so the same
/// state or operator can appear in many jobs without being copied. The pool as
/// a whole is meant to be reused between batches, and is **not** thread-safe.
#[derive(Debug)]
pub struct InnerProductPool<A> {
    threads: Vec<thread::JoinHandle<()>>,
    workers_in: channel::Sender<ToWorker<A>>,
    workers_out: channel::Receiver<FromWorker<A>>,
    batch: Cell<u64>,
}

impl<A> InnerProductPool<A>
where A: ComplexScalar + 'static
{
    /// Create a new thread pool of `nthreads` threads.
    pub fn new(nthreads: usize) -> Self {
        debug!("InnerProductPool: starting {nthreads} workers");
        let (tx_in, rx_in) = channel::unbounded();
        let (tx_out, rx_out) = channel::unbounded();
        let mut threads = Vec::with_capacity(nthreads);
        for id in 0..nthreads {
            let worker_receiver: channel::Receiver<ToWorker<A>> = rx_in.clone();
            let worker_sender: channel::Sender<FromWorker<A>> = tx_out.clone();
            let th = thread::spawn(move || loop {
                match worker_receiver.recv() {
                    Ok(ToWorker::Stop) => { break; },
                    Ok(ToWorker::Work(batch, idx, (chi, op, psi))) => {
                        trace!("worker {id}: batch {batch}, job {idx}");
                        let res = operator_inner_product(&chi, &op, &psi);
                        let out = FromWorker::Output(batch, idx, res);
                        match worker_sender.send(out) {
                            Ok(()) => { continue; },
                            Err(err) => { panic!("sender error: {err}"); },
                        }
                    },
                    Err(err) => {
                        match worker_sender.send(FromWorker::RecvError(err)) {
                            Ok(()) => { panic!("receiver error"); },
                            Err(_) => { panic!("sender error: {err}"); },
                        }
                    },
                }
            });
            threads.push(th);
        }
        Self {
            threads,
            workers_in: tx_in,
            workers_out: rx_out,
            batch: Cell::new(0),
        }
    }

    /// Create a new thread pool with the number of threads equal to the number
    /// of logical CPU cores available in the current system.
    pub fn new_cpus() -> Self { Self::new(num_cpus::get()) }

    /// Create a new thread pool with the number of threads equal to the number
    /// of physical CPU cores available in the current system.
    pub fn new_physical() -> Self { Self::new(num_cpus::get_physical()) }

    /// Return the number of worker threads.
    pub fn nthreads(&self) -> usize { self.threads.len() }

    // send a new batch to the workers, returning its number and size
    fn enqueue<I>(&self, jobs: I) -> PoolResult<(u64, usize)>
    where I: IntoIterator<Item = Job<A>>
    {
        if self.threads.iter().any(|th| th.is_finished()) {
            return Err(DeadThread);
        }
        let batch = self.batch.get() + 1;
        self.batch.set(batch);
        let mut count: usize = 0;
        for job in jobs.into_iter() {
            match self.workers_in.send(ToWorker::Work(batch, count, job)) {
                Ok(()) => { count += 1; },
                Err(_) => { return Err(ClosedSenderChannel); },
            }
        }
        debug!("InnerProductPool: enqueued {count} jobs in batch {batch}");
        Ok((batch, count))
    }

    /// Enqueue a batch of inner products to be distributed across all threads.
    ///
    /// This method will block until all enqueued jobs have been completed. The
    /// `k`-th element of the output is the result of the `k`-th job; a job that
    /// fails to contract does not affect the others.
    pub fn evaluate<I>(&self, jobs: I) -> PoolResult<Vec<ContractResult<A>>>
    where I: IntoIterator<Item = Job<A>>
    {
        let (batch, count) = self.enqueue(jobs)?;
        let mut output: Vec<(usize, ContractResult<A>)>
            = Vec::with_capacity(count);
        while output.len() < count {
            match self.workers_out.recv() {
                Ok(FromWorker::Output(b, idx, res)) if b == batch => {
                    output.push((idx, res));
                },
                Ok(FromWorker::Output(b, idx, _)) => {
                    trace!("InnerProductPool: dropping job {idx} of stale batch {b}");
                },
                Ok(FromWorker::RecvError(err)) => {
                    return Err(WorkerReceiverError(err));
                },
                Err(err) => { return Err(ClosedReceiverChannel(err)); },
            }
        }
        output.sort_by_key(|(idx, _)| *idx);
        Ok(output.into_iter().map(|(_, res)| res).collect())
    }
}

impl<A> Drop for InnerProductPool<A> {
    fn drop(&mut self) {
        debug!("InnerProductPool: stopping {} workers", self.threads.len());
        (0..self.threads.len())
            .for_each(|_| { self.workers_in.send(ToWorker::Stop).ok(); });
        self.threads.drain(..)
            .for_each(|th| { th.join().ok(); });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64 as C64;
    use rand::{ SeedableRng, rngs::StdRng };
    use crate::contract::ContractError;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn matches_serial_in_order() {
        init();
        let mut rng = StdRng::seed_from_u64(10546);
        let op: Arc<MPO<C64>>
            = Arc::new(MPO::new_random(2, &[1, 3, 3, 1], &mut rng).unwrap());
        let states: Vec<Arc<MPS<C64>>>
            = (0..6)
            .map(|_| Arc::new(MPS::new_random(2, &[1, 2, 2, 1], &mut rng).unwrap()))
            .collect();
        let jobs: Vec<Job<C64>>
            = states.iter()
            .flat_map(|chi| {
                states.iter().map(|psi| (chi.clone(), op.clone(), psi.clone()))
            })
            .collect();
        let serial: Vec<C64>
            = jobs.iter()
            .map(|(chi, op, psi)| operator_inner_product(chi, op, psi).unwrap())
            .collect();

        let pool: InnerProductPool<C64> = InnerProductPool::new(3);
        assert_eq!(pool.nthreads(), 3);
        let parallel = pool.evaluate(jobs.clone()).unwrap();
        assert_eq!(parallel.len(), serial.len());
        for (p, s) in parallel.into_iter().zip(&serial) {
            assert!((p.unwrap() - s).norm() < 1e-12);
        }

        // the pool is reusable
        let again = pool.evaluate(jobs.into_iter().take(2)).unwrap();
        assert_eq!(again.len(), 2);
        assert!((again[1].as_ref().unwrap() - serial[1]).norm() < 1e-12);
    }

    #[test]
    fn failed_jobs_are_isolated() {
        init();
        let mut rng = StdRng::seed_from_u64(10546);
        let psi2: Arc<MPS<C64>>
            = Arc::new(MPS::new_random(2, &[1, 2, 1], &mut rng).unwrap());
        let psi3: Arc<MPS<C64>>
            = Arc::new(MPS::new_random(2, &[1, 2, 2, 1], &mut rng).unwrap());
        let id2: Arc<MPO<C64>> = Arc::new(MPO::identity(2, 2, 1.0));
        let pool: InnerProductPool<C64> = InnerProductPool::new(2);
        let res = pool.evaluate(vec![
            (psi2.clone(), id2.clone(), psi2.clone()),
            (psi3.clone(), id2.clone(), psi3.clone()),
            (psi2.clone(), id2, psi2),
        ]).unwrap();
        assert_eq!(res.len(), 3);
        assert!(res[0].is_ok());
        assert!(matches!(
            res[1],
            Err(ContractError::SiteCountMismatch { chi: 3, op: 2, psi: 3 })
        ));
        assert!(res[2].is_ok());
    }

    #[test]
    fn abandoned_batch_is_not_mixed_in() {
        init();
        let mut rng = StdRng::seed_from_u64(10546);
        let op: Arc<MPO<C64>>
            = Arc::new(MPO::new_random(2, &[1, 2, 2, 1], &mut rng).unwrap());
        let make_jobs = |rng: &mut StdRng, n: usize| -> Vec<Job<C64>> {
            (0..n)
                .map(|_| {
                    let chi = MPS::new_random(2, &[1, 2, 2, 1], rng).unwrap();
                    let psi = MPS::new_random(2, &[1, 2, 2, 1], rng).unwrap();
                    (Arc::new(chi), op.clone(), Arc::new(psi))
                })
                .collect()
        };
        let stale = make_jobs(&mut rng, 8);
        let fresh = make_jobs(&mut rng, 5);
        let serial: Vec<C64>
            = fresh.iter()
            .map(|(chi, op, psi)| operator_inner_product(chi, op, psi).unwrap())
            .collect();

        let pool: InnerProductPool<C64> = InnerProductPool::new(2);
        // results of this batch are never collected
        let (b, n) = pool.enqueue(stale).unwrap();
        assert_eq!((b, n), (1, 8));
        for _ in 0..2 {
            let res = pool.evaluate(fresh.clone()).unwrap();
            assert_eq!(res.len(), serial.len());
            for (r, s) in res.into_iter().zip(&serial) {
                assert!((r.unwrap() - s).norm() < 1e-12);
            }
        }
    }

    #[test]
    fn empty_batch() {
        let pool: InnerProductPool<f64> = InnerProductPool::new(1);
        assert!(pool.evaluate(Vec::new()).unwrap().is_empty());
    }
}
