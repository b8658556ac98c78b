//! Behaviors that slow down sending.

use crate::controller::{
    AcceptanceDelayController, AcceptanceDelayOnceController, DelayController, DelayOnceController,
};
use crate::endpoint::{Endpoint, Operation};
use crate::error::InterceptError;
use crate::intercept::{
    install_accept_hook, install_hook, install_send_hooks, intercept, unexpected_outcome, Args,
    Hook, Outcome,
};
use crate::patchable::ensure_patchable;
use std::io;
use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

fn pause(delay: Duration, operation: Operation) {
    tracing::trace!("Delaying {} by {:?}", operation, delay);
    thread::sleep(delay);
}

/// Delay the first `send` or `send_all` on `endpoint` by `delay`.
///
/// Later sends go out immediately until [`DelayOnceController::reset`] is
/// called.
///
/// # Errors
///
/// Returns [`InterceptError::NotPatchable`] if the sending operations of
/// `endpoint` cannot be intercepted.
pub fn delay_before_sending_once(
    endpoint: &mut dyn Endpoint,
    delay: Duration,
) -> Result<DelayOnceController, InterceptError> {
    let controller = DelayOnceController::new(delay);
    let state = controller.clone();

    let hook = Hook::new().observe(move |_, args| {
        if state.mark_used_if_first() {
            pause(state.delay(), args.operation());
        }
        Ok(())
    });
    install_send_hooks(endpoint, hook)?;
    Ok(controller)
}

/// Delay every send on `endpoint` and chop what it sends into pieces of at
/// most `chunk_len` bytes.
///
/// - `send` sleeps, then sends at most `chunk_len` bytes and reports how many
///   went out. Callers see an ordinary partial send.
/// - `send_all` splits its payload into `chunk_len`-byte chunks and sleeps
///   before sending each one. The first failing chunk aborts the call and the
///   rest are not sent. An empty payload has no chunks.
///
/// The controller is read before every sleep, so a new delay also applies to
/// the remaining chunks of a `send_all` that is already running. The chunk
/// length is read per chunk too.
///
/// # Errors
///
/// Returns [`InterceptError::NotPatchable`] if the sending operations of
/// `endpoint` cannot be intercepted.
pub fn delay_before_sending(
    endpoint: &mut dyn Endpoint,
    delay: Duration,
    chunk_len: NonZeroUsize,
) -> Result<DelayController, InterceptError> {
    if let Some(operation) = Operation::SENDING
        .into_iter()
        .find(|op| !endpoint.is_replaceable(*op))
    {
        return Err(InterceptError::NotPatchable { operation });
    }

    let controller = DelayController::new(delay, chunk_len);

    let state = controller.clone();
    let truncate = Hook::new().rewrite(move |_, args| {
        pause(state.delay(), Operation::Send);
        let data = args.payload().unwrap_or_default();
        let len = data.len().min(state.chunk_len().get());
        Ok(args.with_payload(&data[..len]))
    });
    install_hook(endpoint, Operation::Send, truncate)?;

    let state = controller.clone();
    intercept(endpoint, Operation::SendAll, move |mut real| {
        Box::new(
            move |endpoint: &mut dyn Endpoint, args: Args<'_>| -> io::Result<Outcome> {
                let data = args.payload().unwrap_or_default();
                let mut offset = 0;
                while offset < data.len() {
                    pause(state.delay(), Operation::SendAll);
                    let end = data.len().min(offset + state.chunk_len().get());
                    let outcome = real(&mut *endpoint, args.with_payload(&data[offset..end]))?;
                    if !matches!(outcome, Outcome::SentAll) {
                        return Err(unexpected_outcome(Operation::SendAll, &outcome));
                    }
                    offset = end;
                }
                Ok(Outcome::SentAll)
            },
        )
    })?;

    Ok(controller)
}

/// Run [`delay_before_sending_once`] on every connection `endpoint` accepts.
///
/// Each connection gets its own one-shot state, armed with the delay the
/// controller holds at the moment the connection is accepted.
///
/// # Errors
///
/// Returns [`InterceptError::NotPatchable`] if `accept` on `endpoint` cannot
/// be intercepted. Failing to install on an accepted connection fails that
/// `accept()` call.
pub fn delay_before_sending_upon_acceptance_once(
    endpoint: &mut dyn Endpoint,
    delay: Duration,
) -> Result<AcceptanceDelayOnceController, InterceptError> {
    let controller = AcceptanceDelayOnceController::new(delay);
    let template = controller.clone();
    install_upon_acceptance(endpoint, move |conn| {
        delay_before_sending_once(conn, template.delay()).map(drop)
    })?;
    Ok(controller)
}

/// Run [`delay_before_sending`] on every connection `endpoint` accepts.
///
/// Each connection gets the delay and chunk length the controller holds at
/// the moment it is accepted.
///
/// # Errors
///
/// Returns [`InterceptError::NotPatchable`] if `accept` on `endpoint` cannot
/// be intercepted. Failing to install on an accepted connection fails that
/// `accept()` call.
pub fn delay_before_sending_upon_acceptance(
    endpoint: &mut dyn Endpoint,
    delay: Duration,
    chunk_len: NonZeroUsize,
) -> Result<AcceptanceDelayController, InterceptError> {
    let controller = AcceptanceDelayController::new(delay, chunk_len);
    let template = controller.clone();
    install_upon_acceptance(endpoint, move |conn| {
        delay_before_sending(conn, template.delay(), template.chunk_len()).map(drop)
    })?;
    Ok(controller)
}

fn install_upon_acceptance<F>(endpoint: &mut dyn Endpoint, apply: F) -> Result<(), InterceptError>
where
    F: Fn(&mut dyn Endpoint) -> Result<(), InterceptError> + Send + Sync + 'static,
{
    let hook = Hook::new().after(move |_, outcome, _| match outcome {
        Outcome::Accepted(conn, addr) => {
            let mut conn = ensure_patchable(conn, &Operation::SENDING);
            apply(conn.as_mut())?;
            tracing::trace!("Slowed sending on connection from {}", addr);
            Ok(Outcome::Accepted(conn, addr))
        }
        other => Err(unexpected_outcome(Operation::Accept, &other)),
    });
    install_accept_hook(endpoint, hook)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEndpoint;
    use crate::patchable::PatchableEndpoint;
    use std::net::SocketAddr;
    use std::time::Instant;

    const TICK: Duration = Duration::from_millis(40);

    fn len(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn patched_mock() -> (PatchableEndpoint, MockEndpoint) {
        let mock = MockEndpoint::new();
        (PatchableEndpoint::create_from(mock.clone()), mock)
    }

    fn timed<T>(f: impl FnOnce() -> T) -> (T, Duration) {
        let start = Instant::now();
        let value = f();
        (value, start.elapsed())
    }

    // ===========================================
    // delay_before_sending_once Tests
    // ===========================================

    #[test]
    fn once_delays_only_first_send() {
        let (mut endpoint, mock) = patched_mock();
        let controller = delay_before_sending_once(&mut endpoint, TICK).unwrap();

        let (_, first) = timed(|| endpoint.send_all(b"first").unwrap());
        let (_, second) = timed(|| endpoint.send(b"second").unwrap());

        assert!(first >= TICK);
        assert!(second < TICK);
        assert!(controller.is_used());
        assert_eq!(mock.sent_bytes(), b"firstsecond");
    }

    #[test]
    fn once_rearms_after_reset() {
        let (mut endpoint, _mock) = patched_mock();
        let controller = delay_before_sending_once(&mut endpoint, TICK).unwrap();
        endpoint.send(b"a").unwrap();

        controller.reset();
        let (_, elapsed) = timed(|| endpoint.send(b"b").unwrap());
        assert!(elapsed >= TICK);
    }

    #[test]
    fn once_on_fixed_endpoint_fails() {
        let mut mock = MockEndpoint::new();
        assert!(matches!(
            delay_before_sending_once(&mut mock, TICK),
            Err(InterceptError::NotPatchable { .. })
        ));
    }

    // ===========================================
    // delay_before_sending Tests
    // ===========================================

    #[test]
    fn send_is_truncated_to_chunk_len() {
        let (mut endpoint, mock) = patched_mock();
        delay_before_sending(&mut endpoint, Duration::ZERO, len(3)).unwrap();

        assert_eq!(endpoint.send(b"abcdefgh").unwrap(), 3);
        assert_eq!(endpoint.send(b"de").unwrap(), 2);
        assert_eq!(mock.sent_payloads(), vec![b"abc".to_vec(), b"de".to_vec()]);
    }

    #[test]
    fn empty_send_still_waits() {
        let (mut endpoint, mock) = patched_mock();
        delay_before_sending(&mut endpoint, TICK, len(4)).unwrap();

        let (sent, elapsed) = timed(|| endpoint.send(b"").unwrap());
        assert_eq!(sent, 0);
        assert!(elapsed >= TICK);
        assert_eq!(mock.send_calls(), 1);
    }

    #[test]
    fn send_all_is_chunked_in_order() {
        let (mut endpoint, mock) = patched_mock();
        delay_before_sending(&mut endpoint, Duration::ZERO, len(4)).unwrap();

        endpoint.send_all(b"0123456789").unwrap();

        assert_eq!(
            mock.sent_payloads(),
            vec![b"0123".to_vec(), b"4567".to_vec(), b"89".to_vec()]
        );
        assert_eq!(mock.send_all_calls(), 3);
    }

    #[test]
    fn send_all_waits_once_per_chunk() {
        let (mut endpoint, _mock) = patched_mock();
        delay_before_sending(&mut endpoint, TICK, len(2)).unwrap();

        let (_, elapsed) = timed(|| endpoint.send_all(b"abcde").unwrap());
        assert!(elapsed >= TICK * 3);
    }

    #[test]
    fn empty_send_all_sends_nothing() {
        let (mut endpoint, mock) = patched_mock();
        delay_before_sending(&mut endpoint, Duration::from_secs(5), len(2)).unwrap();

        let (_, elapsed) = timed(|| endpoint.send_all(b"").unwrap());
        assert!(elapsed < Duration::from_secs(1));
        assert_eq!(mock.send_all_calls(), 0);
    }

    #[test]
    fn failed_chunk_stops_the_loop() {
        let (mut endpoint, mock) = patched_mock();
        delay_before_sending(&mut endpoint, Duration::ZERO, len(2)).unwrap();
        mock.fail_next_send(io::ErrorKind::ConnectionReset);

        let err = endpoint.send_all(b"abcdef").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(mock.send_all_calls(), 1);
        assert!(mock.sent_payloads().is_empty());
    }

    #[test]
    fn controller_changes_apply_to_next_call() {
        let (mut endpoint, mock) = patched_mock();
        let controller = delay_before_sending(&mut endpoint, Duration::ZERO, len(2)).unwrap();

        controller.set_chunk_len(len(5));
        endpoint.send_all(b"abcdefg").unwrap();
        assert_eq!(mock.sent_payloads(), vec![b"abcde".to_vec(), b"fg".to_vec()]);

        controller.set_delay(TICK);
        let (_, elapsed) = timed(|| endpoint.send(b"x").unwrap());
        assert!(elapsed >= TICK);
    }

    #[test]
    fn delay_change_reaches_running_send_all() {
        let (mut endpoint, mock) = patched_mock();
        let slow = TICK * 3;
        let controller = delay_before_sending(&mut endpoint, slow, len(1)).unwrap();

        let remote = controller.clone();
        let setter = std::thread::spawn(move || {
            std::thread::sleep(TICK);
            remote.set_delay(Duration::ZERO);
        });
        let (_, elapsed) = timed(|| endpoint.send_all(b"abc").unwrap());
        setter.join().unwrap();

        assert!(elapsed >= slow);
        assert!(elapsed < slow * 2, "{elapsed:?}");
        assert_eq!(mock.sent_bytes(), b"abc");
    }

    // ===========================================
    // Upon-acceptance Tests
    // ===========================================

    fn listener_with_connections(n: usize) -> (PatchableEndpoint, Vec<MockEndpoint>) {
        let listener = MockEndpoint::new();
        let conns: Vec<MockEndpoint> = (0..n).map(|_| MockEndpoint::new()).collect();
        for (i, conn) in conns.iter().enumerate() {
            let peer = SocketAddr::from(([127, 0, 0, 1], 6000 + i as u16));
            listener.queue_connection(conn.clone(), peer);
        }
        (PatchableEndpoint::create_from(listener), conns)
    }

    #[test]
    fn accepted_connections_are_chunked() {
        let (mut listener, conns) = listener_with_connections(1);
        delay_before_sending_upon_acceptance(&mut listener, Duration::ZERO, len(3)).unwrap();

        let (mut conn, _) = listener.accept().unwrap();
        assert!(conn.is_replaceable(Operation::Send));
        conn.send_all(b"abcdefg").unwrap();

        assert_eq!(
            conns[0].sent_payloads(),
            vec![b"abc".to_vec(), b"def".to_vec(), b"g".to_vec()]
        );
    }

    #[test]
    fn acceptance_reads_controller_at_accept_time() {
        let (mut listener, conns) = listener_with_connections(2);
        let controller =
            delay_before_sending_upon_acceptance(&mut listener, Duration::ZERO, len(2)).unwrap();

        let (mut first, _) = listener.accept().unwrap();
        controller.set_chunk_len(len(4));
        let (mut second, _) = listener.accept().unwrap();

        first.send_all(b"abcd").unwrap();
        second.send_all(b"abcd").unwrap();
        assert_eq!(conns[0].sent_payloads().len(), 2);
        assert_eq!(conns[1].sent_payloads().len(), 1);
    }

    #[test]
    fn each_accepted_connection_fires_once() {
        let (mut listener, _conns) = listener_with_connections(2);
        delay_before_sending_upon_acceptance_once(&mut listener, TICK).unwrap();

        let (mut first, _) = listener.accept().unwrap();
        let (mut second, _) = listener.accept().unwrap();

        let (_, a) = timed(|| first.send(b"a").unwrap());
        let (_, b) = timed(|| first.send(b"b").unwrap());
        let (_, c) = timed(|| second.send(b"c").unwrap());
        assert!(a >= TICK);
        assert!(b < TICK);
        assert!(c >= TICK);
    }

    #[test]
    fn acceptance_once_reads_delay_at_accept_time() {
        let (mut listener, _conns) = listener_with_connections(2);
        let controller =
            delay_before_sending_upon_acceptance_once(&mut listener, Duration::ZERO).unwrap();

        let (mut first, _) = listener.accept().unwrap();
        controller.set_delay(TICK);
        let (mut second, _) = listener.accept().unwrap();

        let (_, fast) = timed(|| first.send_all(b"a").unwrap());
        let (_, slow) = timed(|| second.send_all(b"b").unwrap());
        assert!(fast < TICK);
        assert!(slow >= TICK);
        assert_eq!(controller.delay(), TICK);
    }

    #[test]
    fn acceptance_on_fixed_listener_fails() {
        let mut listener = MockEndpoint::new();
        assert!(matches!(
            delay_before_sending_upon_acceptance(&mut listener, TICK, len(1)),
            Err(InterceptError::NotPatchable {
                operation: Operation::Accept
            })
        ));
    }
}
