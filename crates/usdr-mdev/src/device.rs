//! MultiDevice -- a virtual device backed by an array of physical devices.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use usdr_core::{
    Device, Error, Result, Stream, StreamDirection, StreamFlags, StreamInfo, StreamRequest,
    StreamSlots, SyncType,
};

use crate::stream::{AggregateStream, Member};

/// N physical devices presented as one [`Device`].
///
/// Every stream request is split evenly across all devices; the resulting
/// [`AggregateStream`] carries `N x per-device` channels. Device 0 is the
/// timing master.
pub struct MultiDevice {
    name: String,
    uuid: [u8; 16],
    /// Native channels per device, RX then TX.
    channels: [usize; 2],
    /// `None` once a device has been destroyed.
    devices: Vec<Option<Box<dyn Device>>>,
    slots: StreamSlots,
}

impl MultiDevice {
    pub(crate) fn new(
        name: String,
        uuid: [u8; 16],
        channels: [usize; 2],
        devices: Vec<Box<dyn Device>>,
    ) -> Self {
        MultiDevice {
            name,
            uuid,
            channels,
            devices: devices.into_iter().map(Some).collect(),
            slots: StreamSlots::new(),
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// The physical device at `index`, unless it has been destroyed.
    pub fn device(&self, index: usize) -> Option<&dyn Device> {
        self.devices.get(index)?.as_deref()
    }

    /// Destroy sub-streams created so far for a request that failed.
    /// Every device of the array, or `NoDevice` once the array is destroyed.
    fn live_devices(&self) -> Result<Vec<&dyn Device>> {
        self.devices
            .iter()
            .map(|d| {
                d.as_deref()
                    .ok_or_else(|| Error::NoDevice(format!("{}: device array destroyed", self.name)))
            })
            .collect()
    }

    async fn rollback(&self, members: Vec<Member>) {
        for mut m in members {
            if let Err(e) = m.stream.destroy().await {
                warn!(
                    array = %self.name,
                    device = m.device_index,
                    error = %e,
                    "sub-stream destroy failed during rollback"
                );
            }
        }
    }
}

#[async_trait]
impl Device for MultiDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn uuid(&self) -> [u8; 16] {
        self.uuid
    }

    /// Channels across the whole array: device 0's count times the number of
    /// devices.
    fn channel_count(&self, direction: StreamDirection) -> usize {
        self.channels[direction.index()] * self.devices.len()
    }

    async fn create_stream(&self, request: &StreamRequest) -> Result<Box<dyn Stream>> {
        let direction = StreamDirection::from_sid(&request.sid)?;
        if self.devices.iter().any(Option::is_none) {
            return Err(Error::NoDevice(format!("{}: device array destroyed", self.name)));
        }

        let count = self.devices.len();
        let requested = request.channels.count();
        if requested % count != 0 {
            return Err(Error::InvalidArgument(format!(
                "{requested} channels cannot be split evenly across {count} devices"
            )));
        }
        let sub_request = StreamRequest {
            channels: request.channels.split(count)?,
            flags: request.flags | StreamFlags::NEED_FD,
            ..request.clone()
        };

        let slot = self.slots.claim(direction)?;

        let mut members: Vec<Member> = Vec::with_capacity(count);
        for (index, device) in self.devices.iter().enumerate() {
            let Some(device) = device else {
                continue;
            };
            let mut stream = match device.create_stream(&sub_request).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(array = %self.name, device = index, error = %e, "sub-stream creation failed");
                    self.rollback(members).await;
                    return Err(e);
                }
            };

            let fd = match stream.option_get("fd") {
                Ok(fd) if fd >= 0 => i32::try_from(fd).ok(),
                _ => None,
            };
            let Some(fd) = fd else {
                warn!(array = %self.name, device = index, "sub-stream has no pollable descriptor");
                if let Err(e) = stream.destroy().await {
                    warn!(array = %self.name, device = index, error = %e, "sub-stream destroy failed");
                }
                self.rollback(members).await;
                return Err(Error::NotSupported(format!(
                    "{}: device {index} provides no pollable descriptor",
                    self.name
                )));
            };

            debug!(array = %self.name, device = index, fd, "sub-stream created");
            members.push(Member {
                device_index: index,
                stream,
                fd,
            });
        }

        let first = members[0].stream.stat();
        let info = StreamInfo {
            channels: members.len() * first.channels,
            ..first
        };
        info!(
            array = %self.name,
            direction = %direction,
            devices = members.len(),
            channels = info.channels,
            packet_symbols = info.packet_symbols,
            "aggregate stream created"
        );

        Ok(Box::new(AggregateStream::new(members, info, slot)))
    }

    /// Arm every device with the sub-streams it carries, then fire the
    /// reference pulse generator on the master for `sysref`.
    async fn timer_op(&self, streams: &mut [&mut dyn Stream], sync: &SyncType) -> Result<()> {
        if streams.is_empty() || streams.len() > 2 {
            return Err(Error::InvalidArgument(format!(
                "sync takes one or two streams, {} given",
                streams.len()
            )));
        }
        if *sync == SyncType::SysrefGen {
            return Err(Error::InvalidArgument(format!(
                "{}: '{sync}' is not supported on a device array",
                self.name
            )));
        }

        let devices = self.live_devices()?;

        let mut aggregates: Vec<&mut AggregateStream> = Vec::with_capacity(streams.len());
        for s in streams.iter_mut() {
            let agg = s
                .as_any_mut()
                .downcast_mut::<AggregateStream>()
                .ok_or_else(|| {
                    Error::InvalidArgument(format!("{}: stream not created by this array", self.name))
                })?;
            aggregates.push(agg);
        }

        for (index, device) in devices.iter().enumerate() {
            let mut subs: Vec<&mut dyn Stream> = Vec::with_capacity(aggregates.len());
            for agg in aggregates.iter_mut() {
                if let Some(sub) = agg.member_mut(index) {
                    subs.push(sub);
                }
            }
            if subs.is_empty() {
                debug!(array = %self.name, device = index, "no streams on device, skipping sync");
                continue;
            }
            debug!(array = %self.name, device = index, streams = subs.len(), %sync, "arming device");
            device.timer_op(&mut subs, sync).await?;
        }

        if *sync == SyncType::Sysref {
            if let Some(master) = devices.first() {
                debug!(array = %self.name, "triggering reference pulse on master");
                master.timer_op(&mut [], &SyncType::SysrefGen).await?;
            }
        }
        Ok(())
    }

    async fn destroy(&mut self) -> Result<()> {
        let mut first_err = None;
        for (index, slot) in self.devices.iter_mut().enumerate() {
            match slot.take() {
                Some(mut device) => {
                    debug!(array = %self.name, device = index, "destroying device");
                    if let Err(e) = device.destroy().await {
                        warn!(array = %self.name, device = index, error = %e, "device destroy failed");
                        first_err.get_or_insert(e);
                    }
                }
                None => warn!(array = %self.name, device = index, "device already destroyed"),
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for MultiDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiDevice")
            .field("name", &self.name)
            .field("devices", &self.devices.len())
            .field("channels", &self.channels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MultiDeviceBuilder;
    use std::time::Duration;
    use usdr_core::{ChannelInfo, SendStat, StreamCommand};
    use usdr_test_harness::{MockDevice, MockProbe};

    const UUID: [u8; 16] = [0xAB; 16];

    fn board(name: &str) -> MockDevice {
        MockDevice::new(name).with_uuid(UUID).with_channels(2, 2)
    }

    async fn array(boards: Vec<MockDevice>) -> (MultiDevice, Vec<MockProbe>) {
        let probes = boards.iter().map(MockDevice::probe).collect();
        let dev = MultiDeviceBuilder::new()
            .name("array")
            .devices(boards.into_iter().map(|b| Box::new(b) as Box<dyn Device>))
            .build()
            .await
            .unwrap();
        (dev, probes)
    }

    fn request(sid: &str, channels: usize) -> StreamRequest {
        StreamRequest::new(sid, "ci16", ChannelInfo::with_count(channels), 512)
    }

    // -----------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn two_by_two_gives_four_channels() {
        let (dev, probes) = array(vec![board("a"), board("b")]).await;
        assert_eq!(dev.channel_count(StreamDirection::Rx), 4);

        let mut s = dev.create_stream(&request("rx/0", 4)).await.unwrap();
        let info = s.stat();
        assert_eq!(info.channels, 4);
        assert_eq!(info.packet_symbols, 512);
        assert_eq!(info.packet_bytes, 512 * 4);

        for p in &probes {
            let created = p.created();
            assert_eq!(created.len(), 1);
            assert_eq!(created[0].channels.count(), 2);
            assert!(created[0].flags.contains(StreamFlags::NEED_FD));
        }
        assert_eq!(s.option_get("fd").unwrap(), 7);
        s.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn failing_device_leaks_nothing() {
        let (dev, probes) = array(vec![
            board("a"),
            board("b"),
            board("c").failing_create(Error::Transport("dma setup".into())),
        ])
        .await;

        let res = dev.create_stream(&request("rx/0", 6)).await;
        assert!(matches!(res, Err(Error::Transport(_))));
        for p in &probes[..2] {
            assert_eq!(p.live_streams(), 0);
            assert_eq!(p.stream_destroys(), 1);
        }

        // The array's own slot was released with the failure.
        let res = dev.create_stream(&request("rx/0", 6)).await;
        assert!(matches!(res, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn missing_descriptor_is_not_supported() {
        let (dev, probes) = array(vec![board("a"), board("b").with_fd(Some(-1))]).await;
        let res = dev.create_stream(&request("tx/0", 4)).await;
        assert!(matches!(res, Err(Error::NotSupported(_))));
        assert_eq!(probes[0].live_streams(), 0);
        assert_eq!(probes[1].live_streams(), 0);
    }

    #[tokio::test]
    async fn bad_requests_rejected() {
        let (dev, _) = array(vec![board("a"), board("b")]).await;
        assert!(matches!(
            dev.create_stream(&request("rx/1", 4)).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            dev.create_stream(&request("rx/0", 3)).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn one_stream_per_direction() {
        let (dev, _) = array(vec![board("a"), board("b")]).await;
        let mut rx = dev.create_stream(&request("rx/0", 4)).await.unwrap();
        assert!(matches!(
            dev.create_stream(&request("rx/0", 4)).await,
            Err(Error::Busy(_))
        ));
        let mut tx = dev.create_stream(&request("tx/0", 2)).await.unwrap();
        assert_eq!(tx.stat().channels, 2);

        rx.destroy().await.unwrap();
        tx.destroy().await.unwrap();
        let mut rx = dev.create_stream(&request("rx/0", 4)).await.unwrap();
        rx.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn uuid_mismatch_destroys_everything() {
        let a = board("a");
        let b = MockDevice::new("b").with_uuid([1; 16]);
        let (pa, pb) = (a.probe(), b.probe());
        let res = MultiDeviceBuilder::new()
            .device(Box::new(a))
            .device(Box::new(b))
            .build()
            .await;
        assert!(matches!(res, Err(Error::NoDevice(_))));
        assert_eq!(pa.device_destroys(), 1);
        assert_eq!(pb.device_destroys(), 1);
    }

    #[tokio::test]
    async fn device_count_limits() {
        assert!(matches!(
            MultiDeviceBuilder::new().build().await,
            Err(Error::InvalidArgument(_))
        ));
        let many = (0..33).map(|i| Box::new(board(&format!("d{i}"))) as Box<dyn Device>);
        assert!(matches!(
            MultiDeviceBuilder::new().devices(many).build().await,
            Err(Error::InvalidArgument(_))
        ));
    }

    // -----------------------------------------------------------------
    // I/O
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn recv_slices_buffers_per_device() {
        let (dev, _) = array(vec![
            board("a").with_fill(0xA1).with_first_timestamp(1000).with_lost(2),
            board("b")
                .with_fill(0xB2)
                .with_first_timestamp(1000)
                .with_lost(3)
                .with_recv_samples(100),
        ])
        .await;
        let mut s = dev.create_stream(&request("rx/0", 4)).await.unwrap();

        let mut bufs = vec![vec![0u8; 512 * 4]; 4];
        let mut views: Vec<&mut [u8]> = bufs.iter_mut().map(|b| b.as_mut_slice()).collect();
        let info = s.recv(&mut views, Duration::ZERO).await.unwrap();

        assert_eq!(info.samples, 100);
        assert_eq!(info.first_timestamp, 1000);
        assert_eq!(info.lost, 5);
        assert!(bufs[0].iter().chain(&bufs[1]).all(|b| *b == 0xA1));
        assert!(bufs[2].iter().chain(&bufs[3]).all(|b| *b == 0xB2));
        assert_eq!(s.stats().buffers, 2);
        s.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn recv_timestamp_from_master_on_disagreement() {
        let (dev, _) = array(vec![
            board("a").with_first_timestamp(500),
            board("b").with_first_timestamp(400),
        ])
        .await;
        let mut s = dev.create_stream(&request("rx/0", 2)).await.unwrap();
        let mut a = vec![0u8; 2048];
        let mut b = vec![0u8; 2048];
        let info = s
            .recv(&mut [&mut a[..], &mut b[..]], Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(info.first_timestamp, 500);
        s.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn send_aggregates_status() {
        let (dev, probes) = array(vec![
            board("a").with_send_stat(SendStat {
                underruns: 1,
                fifo_used: 10,
                last_hw_time: 500,
            }),
            board("b").with_send_stat(SendStat {
                underruns: 2,
                fifo_used: 30,
                last_hw_time: 600,
            }),
        ])
        .await;
        let mut s = dev.create_stream(&request("tx/0", 4)).await.unwrap();

        let bufs: Vec<Vec<u8>> = (1..=4u8).map(|c| vec![c; 64]).collect();
        let views: Vec<&[u8]> = bufs.iter().map(Vec::as_slice).collect();
        let stat = s.send(&views, 16, 9000, Duration::ZERO).await.unwrap();

        assert_eq!(stat.underruns, 3);
        assert_eq!(stat.fifo_used, 30);
        assert_eq!(stat.last_hw_time, 500);
        assert_eq!(probes[0].sent()[0].leading_bytes, vec![1, 2]);
        assert_eq!(probes[1].sent()[0].leading_bytes, vec![3, 4]);
        assert_eq!(probes[1].sent()[0].timestamp, 9000);
        s.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn wrong_buffer_count_rejected() {
        let (dev, _) = array(vec![board("a"), board("b")]).await;
        let mut s = dev.create_stream(&request("rx/0", 4)).await.unwrap();
        let mut a = vec![0u8; 2048];
        assert!(matches!(
            s.recv(&mut [&mut a[..]], Duration::ZERO).await,
            Err(Error::InvalidArgument(_))
        ));
        s.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn op_and_options_fan_out() {
        let (dev, probes) = array(vec![board("a"), board("b")]).await;
        let mut s = dev.create_stream(&request("rx/0", 4)).await.unwrap();
        s.op(StreamCommand::StartAt, 77).await.unwrap();
        s.option_set("ready", 1).await.unwrap();
        for p in &probes {
            assert_eq!(p.ops(), vec![(StreamCommand::StartAt, 77)]);
            assert_eq!(p.option_sets(), vec![("ready".to_string(), 1)]);
        }
        assert!(s.option_get("bogus").is_err());
        s.destroy().await.unwrap();
    }

    // -----------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn stream_destroy_is_idempotent() {
        let (dev, probes) = array(vec![board("a"), board("b")]).await;
        let mut s = dev.create_stream(&request("rx/0", 4)).await.unwrap();
        s.destroy().await.unwrap();
        s.destroy().await.unwrap();
        for p in &probes {
            assert_eq!(p.stream_destroys(), 1);
            assert_eq!(p.live_streams(), 0);
        }
        assert!(s.op(StreamCommand::Start, 0).await.is_err());
    }

    #[tokio::test]
    async fn device_destroy_twice() {
        let (mut dev, probes) = array(vec![board("a"), board("b")]).await;
        dev.destroy().await.unwrap();
        dev.destroy().await.unwrap();
        for p in &probes {
            assert_eq!(p.device_destroys(), 1);
        }
        assert!(dev.device(0).is_none());
        assert!(matches!(
            dev.create_stream(&request("rx/0", 4)).await,
            Err(Error::NoDevice(_))
        ));
    }

    // -----------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn sysref_arms_all_then_triggers_master() {
        let (dev, probes) = array(vec![board("a"), board("b")]).await;
        let mut rx = dev.create_stream(&request("rx/0", 4)).await.unwrap();
        let mut tx = dev.create_stream(&request("tx/0", 4)).await.unwrap();

        dev.timer_op(&mut [&mut *rx, &mut *tx], &SyncType::Sysref)
            .await
            .unwrap();

        assert_eq!(
            probes[0].timer_ops(),
            vec![(2, SyncType::Sysref), (0, SyncType::SysrefGen)]
        );
        assert_eq!(probes[1].timer_ops(), vec![(2, SyncType::Sysref)]);
        rx.destroy().await.unwrap();
        tx.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn sync_after_destroy_is_no_device() {
        let (mut dev, probes) = array(vec![board("a"), board("b")]).await;
        let mut rx = dev.create_stream(&request("rx/0", 4)).await.unwrap();
        dev.destroy().await.unwrap();

        assert!(matches!(
            dev.timer_op(&mut [&mut *rx], &SyncType::Sysref).await,
            Err(Error::NoDevice(_))
        ));
        for p in &probes {
            assert!(p.timer_ops().is_empty());
        }
        rx.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn sync_argument_checks() {
        let (dev, _) = array(vec![board("a")]).await;
        let mut rx = dev.create_stream(&request("rx/0", 2)).await.unwrap();

        assert!(matches!(
            dev.timer_op(&mut [], &SyncType::All).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            dev.timer_op(&mut [&mut *rx], &SyncType::SysrefGen).await,
            Err(Error::InvalidArgument(_))
        ));

        let foreign_dev = MockDevice::new("x");
        let mut foreign = foreign_dev
            .create_stream(&request("rx/0", 1))
            .await
            .unwrap();
        assert!(matches!(
            dev.timer_op(&mut [&mut *foreign], &SyncType::All).await,
            Err(Error::InvalidArgument(_))
        ));

        dev.timer_op(&mut [&mut *rx], &SyncType::All)
            .await
            .unwrap();
        rx.destroy().await.unwrap();
    }
}
