// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::{
    inetstack::{
        protocols::tcp::{
            segment::TcpHeader,
            tests::{
                poll,
                Test,
                ALICE_ISS,
                BOB_ISS,
            },
            timers::TimerKind,
            SeqNumber,
            State,
        },
        test_helpers,
    },
    runtime::network::config::TcpConfig,
};
use ::anyhow::Result;
use ::std::{
    task::Poll,
    time::Duration,
};

//======================================================================================================================
// Helper Functions
//======================================================================================================================

/// Bob acknowledges everything up to `ack` and advertises `window`.
fn bob_acks(test: &mut Test, ack: u32, window: u16) -> Result<()> {
    let header: TcpHeader = test.bob_header(BOB_ISS + 1, Some(ack), window);
    test.bob_sends(header, &[])?;
    Ok(())
}

/// Checks the next data segment Alice sent.
fn expect_data(test: &mut Test, seq: u32, len: usize, psh: bool) -> Result<()> {
    let (header, data) = test.alice_sent()?;
    crate::ensure_eq!(header.seq_num, SeqNumber::from(seq));
    crate::ensure_eq!(data.len(), len);
    crate::ensure_eq!(header.psh, psh);
    crate::ensure_eq!(header.ack, true);
    Ok(())
}

//======================================================================================================================
// Tests
//======================================================================================================================

#[test]
fn send_is_limited_by_congestion_and_peer_windows() -> Result<()> {
    let mut test: Test = Test::establish(TcpConfig::default(), 1500, 1000)?;
    let qd = test.qd;
    let mut send = Box::pin(test.alice.sendmsg(qd, &[7; 3000])?);

    // The congestion window starts at one segment.
    expect_data(&mut test, ALICE_ISS + 1, 1000, false)?;
    crate::ensure_eq!(test.layer.num_frames(), 0);
    crate::ensure_eq!(poll(send.as_mut()).is_pending(), true);

    // Slow start opens up to two segments, but Bob's window only has room for 1500 bytes.
    bob_acks(&mut test, ALICE_ISS + 1001, 1500)?;
    expect_data(&mut test, ALICE_ISS + 1001, 1000, false)?;
    expect_data(&mut test, ALICE_ISS + 2001, 500, false)?;
    crate::ensure_eq!(test.layer.num_frames(), 0);
    crate::ensure_eq!(poll(send.as_mut()).is_pending(), true);

    // The last segment ends the write, so it is pushed.
    bob_acks(&mut test, ALICE_ISS + 2001, 1500)?;
    expect_data(&mut test, ALICE_ISS + 2501, 500, true)?;
    crate::ensure_eq!(poll(send.as_mut()), Poll::Ready(Ok(())));

    let cb = test.alice.get_control_block(qd)?;
    crate::ensure_eq!(cb.sender().cwnd(), 3000);
    crate::ensure_eq!(cb.sender().snd_nxt(), SeqNumber::from(ALICE_ISS + 3001));
    crate::ensure_eq!(cb.sender().flight_size(), 1000);
    crate::ensure_eq!(cb.sender().flight_size(), cb.sender().unacked_payload());
    crate::ensure_eq!(cb.timers().is_armed(TimerKind::Retransmit), true);
    Ok(())
}

#[test]
fn writes_are_never_merged() -> Result<()> {
    let mut test: Test = Test::establish(TcpConfig::default(), 8192, 1000)?;
    let qd = test.qd;

    // The first write fills the congestion window, so the next two have to wait.
    let _first = test.alice.sendmsg(qd, &[1; 1000])?;
    expect_data(&mut test, ALICE_ISS + 1, 1000, true)?;
    let _second = test.alice.sendmsg(qd, &[2; 10])?;
    let _third = test.alice.sendmsg(qd, &[3; 10])?;
    crate::ensure_eq!(test.layer.num_frames(), 0);

    bob_acks(&mut test, ALICE_ISS + 1001, 8192)?;
    expect_data(&mut test, ALICE_ISS + 1001, 10, true)?;
    expect_data(&mut test, ALICE_ISS + 1011, 10, true)?;
    crate::ensure_eq!(test.layer.num_frames(), 0);
    Ok(())
}

#[test]
fn outstanding_data_counts_against_congestion_window() -> Result<()> {
    let mut test: Test = Test::establish(TcpConfig::default(), 8192, 1000)?;
    let qd = test.qd;

    let _first = test.alice.sendmsg(qd, &[1; 500])?;
    expect_data(&mut test, ALICE_ISS + 1, 500, true)?;

    // Only half of the congestion window is left, so the second write goes out in part.
    let mut second = Box::pin(test.alice.sendmsg(qd, &[2; 800])?);
    expect_data(&mut test, ALICE_ISS + 501, 500, false)?;
    crate::ensure_eq!(test.layer.num_frames(), 0);
    crate::ensure_eq!(poll(second.as_mut()).is_pending(), true);
    let cb = test.alice.get_control_block(qd)?;
    crate::ensure_eq!(cb.sender().usable_window(), 0);

    bob_acks(&mut test, ALICE_ISS + 1001, 8192)?;
    expect_data(&mut test, ALICE_ISS + 1001, 300, true)?;
    crate::ensure_eq!(poll(second.as_mut()), Poll::Ready(Ok(())));
    crate::ensure_eq!(cb.sender().cwnd(), 2000);
    crate::ensure_eq!(cb.sender().usable_window(), 1700);
    Ok(())
}

#[test]
fn retransmission_timeout_resends_oldest_segment() -> Result<()> {
    let mut test: Test = Test::establish(TcpConfig::default(), 0xffff, 1000)?;
    let qd = test.qd;
    let _send = test.alice.sendmsg(qd, &[3; 3000])?;
    expect_data(&mut test, ALICE_ISS + 1, 1000, false)?;
    bob_acks(&mut test, ALICE_ISS + 1001, 0xffff)?;
    expect_data(&mut test, ALICE_ISS + 1001, 1000, false)?;
    expect_data(&mut test, ALICE_ISS + 2001, 1000, true)?;

    test.advance(Duration::from_secs(1));
    expect_data(&mut test, ALICE_ISS + 1001, 1000, false)?;
    crate::ensure_eq!(test.layer.num_frames(), 0);
    let cb = test.alice.get_control_block(qd)?;
    crate::ensure_eq!(cb.sender().rto(), Duration::from_secs(2));
    crate::ensure_eq!(cb.sender().ssthresh(), 2000);
    crate::ensure_eq!(cb.sender().rtt_sample(), None);

    // The rest of the queue follows once the head is acknowledged.
    bob_acks(&mut test, ALICE_ISS + 2001, 0xffff)?;
    expect_data(&mut test, ALICE_ISS + 2001, 1000, true)?;
    crate::ensure_eq!(cb.sender().flight_size(), 1000);
    Ok(())
}

#[test]
fn zero_window_is_probed() -> Result<()> {
    let mut test: Test = Test::establish(TcpConfig::default(), 0, 1000)?;
    let qd = test.qd;
    let mut send = Box::pin(test.alice.sendmsg(qd, b"0123456789")?);

    let (probe, data) = test.alice_sent()?;
    crate::ensure_eq!(probe.seq_num, SeqNumber::from(ALICE_ISS + 1));
    crate::ensure_eq!(data, b"0".to_vec());
    let cb = test.alice.get_control_block(qd)?;
    crate::ensure_eq!(cb.timers().is_armed(TimerKind::Persist), true);
    crate::ensure_eq!(cb.timers().is_armed(TimerKind::Retransmit), false);

    test.advance(Duration::from_secs(1));
    let (probe, data) = test.alice_sent()?;
    crate::ensure_eq!(probe.seq_num, SeqNumber::from(ALICE_ISS + 1));
    crate::ensure_eq!(data, b"0".to_vec());
    crate::ensure_eq!(cb.timers().persist_backoff(), Duration::from_secs(2));

    test.advance(Duration::from_secs(1));
    crate::ensure_eq!(test.layer.num_frames(), 0);
    test.advance(Duration::from_secs(1));
    crate::ensure_eq!(test.layer.num_frames(), 1);
    test.layer.pop_all_frames();
    crate::ensure_eq!(poll(send.as_mut()).is_pending(), true);

    // The window reopens: the rest goes out and the persist timer stops.
    bob_acks(&mut test, ALICE_ISS + 2, 100)?;
    expect_data(&mut test, ALICE_ISS + 2, 9, true)?;
    crate::ensure_eq!(poll(send.as_mut()), Poll::Ready(Ok(())));
    crate::ensure_eq!(cb.timers().is_armed(TimerKind::Persist), false);
    crate::ensure_eq!(cb.timers().is_armed(TimerKind::Retransmit), true);
    crate::ensure_eq!(cb.timers().persist_backoff(), Duration::from_secs(1));
    Ok(())
}

#[test]
fn reads_complete_on_size_or_push() -> Result<()> {
    let mut test: Test = Test::establish(TcpConfig::default(), 8192, 1000)?;
    let qd = test.qd;
    let mut recv = Box::pin(test.alice.recvmsg(qd, 200)?);
    crate::ensure_eq!(poll(recv.as_mut()).is_pending(), true);

    let header: TcpHeader = test.bob_header(BOB_ISS + 1, Some(ALICE_ISS + 1), 8192);
    test.bob_sends(header, &[1; 100])?;
    let (ack, _) = test.alice_sent()?;
    crate::ensure_eq!(ack.ack_num, SeqNumber::from(BOB_ISS + 101));
    crate::ensure_eq!(ack.window_size, 0xffff - 100);
    crate::ensure_eq!(poll(recv.as_mut()).is_pending(), true);

    let mut header: TcpHeader = test.bob_header(BOB_ISS + 101, Some(ALICE_ISS + 1), 8192);
    header.psh = true;
    test.bob_sends(header, &[2; 50])?;
    match poll(recv.as_mut()) {
        Poll::Ready(Ok(buf)) => {
            crate::ensure_eq!(buf.len(), 150);
            crate::ensure_eq!(buf[99], 1);
            crate::ensure_eq!(buf[100], 2);
        },
        other => anyhow::bail!("read should have completed ({:?})", other),
    }
    Ok(())
}

#[test]
fn fin_ends_the_stream() -> Result<()> {
    let mut test: Test = Test::establish(TcpConfig::default(), 8192, 1000)?;
    let qd = test.qd;

    let mut header: TcpHeader = test.bob_header(BOB_ISS + 1, Some(ALICE_ISS + 1), 8192);
    header.fin = true;
    test.bob_sends(header, &[5; 10])?;
    let (ack, _) = test.alice_sent()?;
    crate::ensure_eq!(ack.ack_num, SeqNumber::from(BOB_ISS + 12));
    crate::ensure_eq!(test.alice.state(qd)?, State::CloseWait);

    let mut recv = Box::pin(test.alice.recvmsg(qd, 100)?);
    crate::ensure_eq!(poll(recv.as_mut()), Poll::Ready(Ok(vec![5; 10])));
    let mut recv = Box::pin(test.alice.recvmsg(qd, 100)?);
    crate::ensure_eq!(poll(recv.as_mut()), Poll::Ready(Ok(Vec::new())));
    Ok(())
}

#[test]
fn reads_fail_once_the_connection_is_gone() -> Result<()> {
    let mut test: Test = Test::establish(TcpConfig::default(), 8192, 1000)?;
    let qd = test.qd;

    let mut fin: TcpHeader = test.bob_header(BOB_ISS + 1, Some(ALICE_ISS + 1), 8192);
    fin.fin = true;
    test.bob_sends(fin, &[8; 20])?;
    let _shutdown = test.alice.shutdown(qd)?;
    test.layer.pop_all_frames();
    let ack: TcpHeader = test.bob_header(BOB_ISS + 22, Some(ALICE_ISS + 2), 8192);
    test.bob_sends(ack, &[])?;
    crate::ensure_eq!(test.alice.state(qd)?, State::Closed);

    // What arrived before the close can still be read.
    let mut recv = Box::pin(test.alice.recvmsg(qd, 100)?);
    crate::ensure_eq!(poll(recv.as_mut()), Poll::Ready(Ok(vec![8; 20])));

    let mut recv = Box::pin(test.alice.recvmsg(qd, 100)?);
    match poll(recv.as_mut()) {
        Poll::Ready(Err(e)) => crate::ensure_eq!(e.errno, libc::ESHUTDOWN),
        other => anyhow::bail!("read should have failed ({:?})", other),
    }
    Ok(())
}

#[test]
fn receive_window_closes_and_reopens() -> Result<()> {
    let mut test: Test = Test::establish(test_helpers::small_window_config(), 8192, 1000)?;
    let qd = test.qd;

    let header: TcpHeader = test.bob_header(BOB_ISS + 1, Some(ALICE_ISS + 1), 8192);
    test.bob_sends(header, &[9; 1024])?;
    let (ack, _) = test.alice_sent()?;
    crate::ensure_eq!(ack.ack_num, SeqNumber::from(BOB_ISS + 1025));
    crate::ensure_eq!(ack.window_size, 0);

    let mut recv = Box::pin(test.alice.recvmsg(qd, 512)?);
    crate::ensure_eq!(poll(recv.as_mut()), Poll::Ready(Ok(vec![9; 512])));

    // Reading reopened the window, so Bob is told right away.
    let (update, _) = test.alice_sent()?;
    crate::ensure_eq!(update.ack_num, SeqNumber::from(BOB_ISS + 1025));
    crate::ensure_eq!(update.window_size, 512);
    Ok(())
}

#[test]
fn reset_fails_pending_reads() -> Result<()> {
    let mut test: Test = Test::establish(TcpConfig::default(), 8192, 1000)?;
    let qd = test.qd;
    let mut recv = Box::pin(test.alice.recvmsg(qd, 100)?);
    crate::ensure_eq!(poll(recv.as_mut()).is_pending(), true);

    let mut rst: TcpHeader = test.bob_header(BOB_ISS + 1, None, 0);
    rst.rst = true;
    test.bob_sends(rst, &[])?;

    crate::ensure_eq!(test.alice.state(qd)?, State::Closed);
    match poll(recv.as_mut()) {
        Poll::Ready(Err(e)) => crate::ensure_eq!(e.errno, libc::ECONNRESET),
        other => anyhow::bail!("read should have failed ({:?})", other),
    }
    crate::ensure_eq!(test.alice.num_connections(), 0);
    Ok(())
}
