#[cfg(test)]
pub mod test {
    use std::{collections::HashMap, sync::atomic::Ordering, sync::Arc, time::Duration};

    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::{
        error::DiskError,
        hooks::{dispatched_blocks, DiskEvent, TraceHooks},
        storage::disk::{
            manager::DiskManager,
            request::{block_buffer, Operation},
            scheduler::Policy,
        },
        task::{Host, TaskHandle},
        tests::{
            init_logger,
            manual_disk::{next_issued, settle, ManualDisk},
        },
    };

    const NUM_BLOCKS: usize = 100;
    const BLOCK_SIZE: usize = 16;

    struct Rig {
        host: Host,
        disk: Arc<ManualDisk>,
        issued: UnboundedReceiver<(Operation, u64)>,
        trace: Arc<TraceHooks>,
        manager: Arc<DiskManager>,
    }

    async fn rig() -> Rig {
        init_logger();
        let host = Host::new();
        let (disk, issued) = ManualDisk::new(NUM_BLOCKS, BLOCK_SIZE);
        let trace = Arc::new(TraceHooks::new());
        let manager = DiskManager::builder(disk.clone())
            .host(host.clone())
            .hooks(trace.clone())
            .init()
            .await
            .expect("disk manager init");

        Rig {
            host,
            disk,
            issued,
            trace,
            manager: Arc::new(manager),
        }
    }

    fn spawn_read(rig: &Rig, block: u64) -> TaskHandle<Result<(), DiskError>> {
        let manager = Arc::clone(&rig.manager);
        rig.host.spawn(async move {
            let buffer = block_buffer(BLOCK_SIZE);
            manager.read(block, &buffer).await
        })
    }

    // Dispatches `first` on an idle disk, queues `rest` behind it, then completes
    // everything one command at a time. Returns the blocks in dispatch order.
    async fn run_batch(rig: &mut Rig, first: u64, rest: &[u64]) -> Vec<u64> {
        let mut handles = vec![spawn_read(rig, first)];
        let mut order = vec![next_issued(&mut rig.issued).await];

        for &block in rest {
            handles.push(spawn_read(rig, block));
        }
        settle(&rig.manager, rest.len()).await;

        for _ in rest {
            rig.disk.complete();
            order.push(next_issued(&mut rig.issued).await);
        }
        rig.disk.complete();

        for handle in handles {
            handle.join().await.unwrap().unwrap();
        }
        order
    }

    #[tokio::test]
    async fn init_reports_geometry() {
        let rig = rig().await;

        assert_eq!(rig.manager.num_blocks(), NUM_BLOCKS);
        assert_eq!(rig.manager.block_size(), BLOCK_SIZE);
        assert_eq!(rig.manager.policy().await, Policy::Fcfs);
        assert_eq!(rig.manager.head_position().await, 0);
        assert_eq!(rig.manager.travel(), 0);
        assert!(rig.manager.is_running().await);
    }

    #[tokio::test]
    async fn init_fails_when_device_fails() {
        let (disk, _issued) = ManualDisk::new(NUM_BLOCKS, BLOCK_SIZE);
        disk.fail_init.store(true, Ordering::SeqCst);

        let result = DiskManager::init(disk, Host::new()).await;
        assert!(matches!(result, Err(DiskError::DeviceInit(_))));
    }

    #[tokio::test]
    async fn init_fails_on_empty_geometry() {
        let (disk, _issued) = ManualDisk::new(0, BLOCK_SIZE);

        let result = DiskManager::init(disk, Host::new()).await;
        assert!(matches!(result, Err(DiskError::DeviceInit(_))));
    }

    #[tokio::test]
    async fn init_fails_when_signal_cannot_be_registered() {
        let (disk, _issued) = ManualDisk::new(NUM_BLOCKS, BLOCK_SIZE);
        disk.fail_register.store(true, Ordering::SeqCst);

        let result = DiskManager::init(disk, Host::new()).await;
        assert!(matches!(result, Err(DiskError::SignalInit(_))));
    }

    #[tokio::test]
    async fn fcfs_follows_arrival_order() {
        let mut rig = rig().await;

        let order = run_batch(&mut rig, 0, &[30, 10, 20]).await;
        assert_eq!(order, vec![0, 30, 10, 20]);
    }

    #[tokio::test]
    async fn sstf_picks_nearest_block() {
        let mut rig = rig().await;
        rig.manager.set_policy(Policy::Sstf).await;

        let order = run_batch(&mut rig, 12, &[10, 40, 15]).await;
        assert_eq!(order, vec![12, 10, 15, 40]);
    }

    #[tokio::test]
    async fn cscan_sweeps_up_then_wraps() {
        let mut rig = rig().await;
        rig.manager.set_policy(Policy::CScan).await;

        let order = run_batch(&mut rig, 50, &[5, 60, 90]).await;
        assert_eq!(order, vec![50, 60, 90, 5]);
    }

    #[tokio::test]
    async fn travel_is_counted_at_dispatch() {
        let mut rig = rig().await;

        let first = spawn_read(&rig, 0);
        assert_eq!(next_issued(&mut rig.issued).await, 0);
        let second = spawn_read(&rig, 20);
        let third = spawn_read(&rig, 5);
        settle(&rig.manager, 2).await;

        rig.disk.complete();
        assert_eq!(next_issued(&mut rig.issued).await, 20);
        assert_eq!(rig.manager.travel(), 20);

        rig.disk.complete();
        assert_eq!(next_issued(&mut rig.issued).await, 5);
        // Block 5 is still in flight.
        assert_eq!(rig.manager.travel(), 35);
        assert_eq!(rig.manager.head_position().await, 5);

        rig.disk.complete();
        for handle in [first, second, third] {
            handle.join().await.unwrap().unwrap();
        }

        let moves: Vec<_> = rig
            .trace
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                DiskEvent::Dispatched { request, from } => Some((from, request.block)),
                _ => None,
            })
            .collect();
        assert_eq!(moves, vec![(0, 0), (0, 20), (20, 5)]);

        rig.manager.reset_travel().await;
        assert_eq!(rig.manager.travel(), 0);
    }

    #[tokio::test]
    async fn policy_change_applies_to_later_dispatches() {
        let mut rig = rig().await;

        let mut handles = vec![spawn_read(&rig, 0)];
        assert_eq!(next_issued(&mut rig.issued).await, 0);
        for block in [30, 10, 20] {
            handles.push(spawn_read(&rig, block));
        }
        settle(&rig.manager, 3).await;

        rig.disk.complete();
        assert_eq!(next_issued(&mut rig.issued).await, 30);

        // 30 is in flight and stays put; 20 is now closer than 10.
        rig.manager.set_policy(Policy::Sstf).await;
        rig.disk.complete();
        assert_eq!(next_issued(&mut rig.issued).await, 20);
        rig.disk.complete();
        assert_eq!(next_issued(&mut rig.issued).await, 10);
        rig.disk.complete();

        for handle in handles {
            handle.join().await.unwrap().unwrap();
        }
        assert_eq!(dispatched_blocks(&rig.trace.drain()), vec![0, 30, 20, 10]);
    }

    #[tokio::test]
    async fn every_caller_is_resumed_once() {
        let mut rig = rig().await;
        rig.manager.set_policy(Policy::Sstf).await;

        let blocks = [7, 3, 99, 42, 42, 0, 18];
        let order = run_batch(&mut rig, 50, &blocks).await;
        assert_eq!(order.len(), blocks.len() + 1);

        let events = rig.trace.drain();
        let mut submitted = HashMap::new();
        let mut completed = HashMap::new();
        for event in &events {
            match event {
                DiskEvent::Submitted(info) => *submitted.entry(info.id).or_insert(0) += 1,
                DiskEvent::Completed(info) => *completed.entry(info.id).or_insert(0) += 1,
                _ => {}
            }
        }

        assert_eq!(submitted.len(), blocks.len() + 1);
        assert_eq!(submitted, completed);
        assert!(completed.values().all(|&count| count == 1));
        assert_eq!(rig.manager.pending().await, 0);
    }

    #[tokio::test]
    async fn writes_go_through_the_same_queue() {
        let mut rig = rig().await;

        let manager = Arc::clone(&rig.manager);
        let writer = rig.host.spawn(async move {
            let buffer = block_buffer(BLOCK_SIZE);
            manager.write(9, &buffer).await
        });

        let (operation, block) = rig.issued.recv().await.unwrap();
        assert_eq!((operation, block), (Operation::Write, 9));

        rig.disk.complete();
        writer.join().await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_without_queueing() {
        let rig = rig().await;

        let buffer = block_buffer(BLOCK_SIZE);
        let result = rig.manager.read(NUM_BLOCKS as u64, &buffer).await;
        assert!(matches!(result, Err(DiskError::InvalidBlock { block: 100, .. })));

        let short = block_buffer(BLOCK_SIZE - 1);
        let result = rig.manager.write(1, &short).await;
        assert!(matches!(result, Err(DiskError::BufferTooSmall { len: 15, .. })));

        assert_eq!(rig.manager.pending().await, 0);
        assert!(rig.trace.is_empty());
    }

    #[tokio::test]
    async fn rejected_command_still_resumes_caller() {
        let rig = rig().await;
        rig.disk.reject_next.store(true, Ordering::SeqCst);

        let reader = spawn_read(&rig, 4);
        tokio::time::timeout(Duration::from_secs(5), reader.join())
            .await
            .expect("caller left suspended")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn stops_once_main_exits_with_nothing_queued() {
        let rig = rig().await;

        rig.host.exit_main();
        tokio::time::timeout(Duration::from_secs(5), rig.manager.stopped())
            .await
            .expect("server loop kept running");

        assert!(!rig.manager.is_running().await);
        assert!(matches!(rig.trace.drain().last(), Some(DiskEvent::Stopped { .. })));
    }

    #[tokio::test]
    async fn drains_queue_before_stopping() {
        let mut rig = rig().await;

        let mut handles = vec![spawn_read(&rig, 0)];
        assert_eq!(next_issued(&mut rig.issued).await, 0);
        handles.push(spawn_read(&rig, 10));
        handles.push(spawn_read(&rig, 20));
        settle(&rig.manager, 2).await;

        rig.host.exit_main();
        tokio::task::yield_now().await;
        assert!(rig.manager.is_running().await);

        rig.disk.complete();
        assert_eq!(next_issued(&mut rig.issued).await, 10);
        rig.disk.complete();
        assert_eq!(next_issued(&mut rig.issued).await, 20);
        assert!(rig.manager.is_running().await);
        rig.disk.complete();

        tokio::time::timeout(Duration::from_secs(5), rig.manager.stopped())
            .await
            .expect("server loop kept running");
        for handle in handles {
            handle.join().await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn requests_after_stop_fail_without_queueing() {
        let rig = rig().await;

        rig.host.exit_main();
        tokio::time::timeout(Duration::from_secs(5), rig.manager.stopped())
            .await
            .expect("server loop kept running");

        let buffer = block_buffer(BLOCK_SIZE);
        let read = tokio::time::timeout(Duration::from_secs(2), rig.manager.read(1, &buffer))
            .await
            .expect("read after stop never returned");
        assert!(matches!(read, Err(DiskError::Stopped)));

        let write = tokio::time::timeout(Duration::from_secs(2), rig.manager.write(2, &buffer))
            .await
            .expect("write after stop never returned");
        assert!(matches!(write, Err(DiskError::Stopped)));

        assert_eq!(rig.manager.pending().await, 0);
        assert!(!rig
            .trace
            .drain()
            .iter()
            .any(|event| matches!(event, DiskEvent::Submitted(_))));
    }
}
