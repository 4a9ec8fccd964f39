// Engines on several threads
use std::sync::Arc;
use std::thread;

use super::{compile, engine, installation};
use crate::MatchData;

#[test]
fn test_engine_per_thread() {
    let workers: Vec<_> = [("[0-9]+", b'7'), ("[a-z]+", b'q')]
        .into_iter()
        .map(|(expression, fill)| {
            thread::spawn(move || {
                let e = engine();
                let p = compile(&e, expression);
                for n in 1..=2_000usize {
                    let mut input = vec![b' '; n % 7];
                    input.extend(std::iter::repeat_n(fill, n % 13 + 1));
                    let m = e.match_input(p, 1, "matches", &input).unwrap();
                    let expected: Vec<u8> = std::iter::repeat_n(fill, n % 13 + 1).collect();
                    assert_eq!(m.data, MatchData::Buffer(expected));
                    assert_eq!(m.leftover, 0);
                }
                e.finalize();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn test_shared_engine_serializes_calls() {
    let e = Arc::new(engine());
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let e = Arc::clone(&e);
            thread::spawn(move || {
                let literal = format!("w{}x", i);
                let p = compile(&e, &format!("\"{}\"", literal));
                for _ in 0..200 {
                    let input = format!("..{}..", literal);
                    let m = e.match_input(p, 1, "matches", input.as_bytes()).unwrap();
                    assert_eq!(m.data, MatchData::Buffer(literal.clone().into_bytes()));
                    let t = e.match_input(p, 1, "subs", input.as_bytes()).unwrap();
                    assert_eq!(t.data, MatchData::Text(literal.clone().into_bytes()));
                }
                e.free_pattern(p);
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    if let Ok(e) = Arc::try_unwrap(e) {
        e.finalize();
    }
}

#[test]
fn test_engine_inside_multi_thread_runtime() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .build()
        .unwrap();
    let data = runtime.block_on(async {
        tokio::spawn(async {
            let e = engine();
            let p = compile(&e, "[0-9]+");
            let m = e.match_input(p, 1, "matches", b"x 42").unwrap();
            e.finalize();
            m.data
        })
        .await
        .unwrap()
    });
    assert_eq!(data, MatchData::Buffer(b"42".to_vec()));
}

#[test]
fn test_current_thread_runtime_is_refused() {
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let outside = engine();
    let p = compile(&outside, "[0-9]+");
    runtime.block_on(async {
        let err = crate::Engine::boot(&installation()).err().unwrap();
        assert_eq!(err.code(), crate::ERR_ENGINE_CALL_FAILED);
        let err = outside.compile("[a-z]+").unwrap_err();
        assert_eq!(err.code(), crate::ERR_ENGINE_CALL_FAILED);
        // the fast path never waits on the worker
        let m = outside.match_input(p, 1, "matches", b"7").unwrap();
        assert_eq!(m.data, MatchData::Buffer(b"7".to_vec()));
    });
    outside.finalize();
}
