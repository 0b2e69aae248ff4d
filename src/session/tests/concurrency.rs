use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use rand::prelude::*;
use rand::rngs::StdRng;

use protocol::{
    CommandFlags, CreateDevice, CreateObject, DestroyDevice, Device, GetVersion, Object,
    ObjectCreateInfo, ReadObject, Request, Status, WriteObject,
};
use session::{Dispatch, Error};

mod common;
use common::{config, reply_size, setup};

const SEED: u64 = 4242;
const NUM_THREADS: usize = 4;
const NUM_ITERS: usize = 64;
const OBJECT_SIZE: usize = 256;

#[test]
fn concurrent_calls() {
    let (recorder, session) = setup(&config("reply_min_size = 4096"));

    let device = Device::new();
    let status = session
        .call(&mut CreateDevice {
            name: "gpu",
            device: &device,
        })
        .unwrap();
    assert_eq!(status, Status::SUCCESS);

    let objects: Vec<Object> = (0..NUM_THREADS).map(|_| Object::new()).collect();
    let info = ObjectCreateInfo {
        size: OBJECT_SIZE as u64,
        label: None,
    };
    for (i, object) in objects.iter().enumerate() {
        let status = session
            .call(&mut CreateObject {
                device: &device,
                info: Some(&info),
                object,
            })
            .unwrap();
        assert_eq!(status, Status::SUCCESS);

        let status = session
            .call(&mut WriteObject {
                device: &device,
                object,
                offset: 0,
                data: &[i as u8 + 1; OBJECT_SIZE],
            })
            .unwrap();
        assert_eq!(status, Status::SUCCESS);
    }

    crossbeam::thread::scope(|s| {
        for (i, object) in objects.iter().enumerate() {
            let session = &session;
            let device = &device;
            s.spawn(move |_| {
                let mut rng = StdRng::seed_from_u64(SEED + i as u64);
                let fill = i as u8 + 1;
                for _ in 0..NUM_ITERS {
                    let len = rng.gen_range(1..=OBJECT_SIZE);
                    let mut data = vec![0u8; len];
                    let status = session
                        .call(&mut ReadObject {
                            device,
                            object,
                            offset: (OBJECT_SIZE - len) as u64,
                            data: &mut data,
                        })
                        .unwrap();
                    assert_eq!(status, Status::SUCCESS);
                    assert!(data.iter().all(|&b| b == fill));

                    let len = rng.gen_range(1..=OBJECT_SIZE);
                    session.send(&WriteObject {
                        device,
                        object,
                        offset: 0,
                        data: &vec![fill; len],
                    });
                }
            });
        }
    })
    .unwrap();

    // every submission carries whole commands and at most one call, last
    let mut res_id = 0;
    let mut position = 0;
    let mut slots: HashMap<u32, Vec<(usize, usize)>> = HashMap::new();
    for batch in recorder.batches() {
        let calls = batch
            .iter()
            .filter(|(flags, _)| flags.contains(CommandFlags::GENERATE_REPLY))
            .count();
        assert!(calls <= 1);
        if calls == 1 {
            assert!(batch.last().unwrap().0.contains(CommandFlags::GENERATE_REPLY));
        }

        for (flags, request) in &batch {
            match request {
                Request::SetReplyCommandStream(Some(desc)) => {
                    res_id = desc.resource_id;
                    position = 0;
                }
                Request::SeekReplyCommandStream { position: pos } => {
                    position = *pos as usize;
                }
                _ if flags.contains(CommandFlags::GENERATE_REPLY) => {
                    slots
                        .entry(res_id)
                        .or_default()
                        .push((position, reply_size(request)));
                }
                _ => {}
            }
        }
    }

    // slots are handed out in submission order and never overlap
    assert!(slots.len() > 1);
    let total: usize = slots.values().map(Vec::len).sum();
    assert_eq!(total, 1 + 1 + 2 * NUM_THREADS + NUM_THREADS * NUM_ITERS);
    for ranges in slots.values() {
        for pair in ranges.windows(2) {
            let (start, len) = pair[0];
            assert!(start + len <= pair[1].0);
        }
    }
}

#[test]
fn wait_does_not_hold_the_lock() {
    let (recorder, session) = setup(&config("wait_timeout_ms = 2000"));
    let before = recorder.submits().len();
    recorder.faults.stall.store(true, Ordering::Relaxed);

    let waiting = AtomicBool::new(true);
    crossbeam::thread::scope(|s| {
        s.spawn(|_| {
            let res = session.call(&mut GetVersion);
            waiting.store(false, Ordering::Release);
            assert!(matches!(res, Err(Error::Timeout)));
        });

        // the stalled call reaches the renderer first
        let mut polls = 0;
        while recorder.submits().len() == before {
            polls += 1;
            assert!(polls < 1000, "call was never submitted");
            thread::sleep(Duration::from_millis(1));
        }

        // and does not keep others out while it waits for its reply
        let device = Device::new();
        session.send(&DestroyDevice { device: &device });
        assert!(waiting.load(Ordering::Acquire));

        let batches = recorder.batches();
        assert_eq!(batches.len(), before + 2);
        let call = batches[before].last().unwrap();
        assert_eq!(call, &(CommandFlags::GENERATE_REPLY, Request::GetVersion));
        assert_eq!(batches[before + 1].len(), 1);
        assert_eq!(batches[before + 1][0].0, CommandFlags::empty());
        assert!(matches!(
            batches[before + 1][0].1,
            Request::DestroyDevice { .. }
        ));
    })
    .unwrap();

    assert!(session.is_lost());
}
