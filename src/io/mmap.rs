//! AF_PACKET ring I/O (PACKET_MMAP, TPACKET_V2).
//!
//! The kernel maps a circular buffer of fixed size frames into user
//! space; each frame carries a status word that hands ownership back
//! and forth. Receiving drains USER-owned frames without a syscall;
//! transmitting fills AVAILABLE frames, marks them SEND_REQUEST and
//! wakes the kernel with one zero-length `sendto` per burst.

use libc;

use std::io;
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};

use io::IoDirection;

const PACKET_VERSION: libc::c_int = 10;
const PACKET_RX_RING: libc::c_int = 5;
const PACKET_TX_RING: libc::c_int = 13;
const TPACKET_V2: libc::c_int = 1;

const ETH_P_ALL: u16 = 0x0003;

/// Frame ownership: zero is kernel-owned (and, on TX, available).
pub const TP_STATUS_KERNEL: u32 = 0;
pub const TP_STATUS_USER: u32 = 1;
pub const TP_STATUS_AVAILABLE: u32 = 0;
pub const TP_STATUS_SEND_REQUEST: u32 = 1;

/// One ring frame, 4 KiB, headroom for the frame header included.
pub const FRAME_SIZE: u32 = 4096;
const FRAMES_PER_BLOCK: u32 = 32;
const BLOCK_SIZE: u32 = FRAME_SIZE * FRAMES_PER_BLOCK;

#[repr(C)]
struct TpacketReq {
    tp_block_size: u32,
    tp_block_nr: u32,
    tp_frame_size: u32,
    tp_frame_nr: u32,
}

#[repr(C)]
struct Tpacket2Hdr {
    tp_status: u32,
    tp_len: u32,
    tp_snaplen: u32,
    tp_mac: u16,
    tp_net: u16,
    tp_sec: u32,
    tp_nsec: u32,
    tp_vlan_tci: u16,
    tp_vlan_tpid: u16,
    tp_padding: [u8; 4],
}

/// TPACKET_ALIGN(sizeof(tpacket2_hdr)): offset of packet data in a TX
/// frame.
const TX_DATA_OFFSET: usize = (mem::size_of::<Tpacket2Hdr>() + 15) & !15;

/// One mapped ring, bound to one direction of one physical port.
pub struct MmapRing {
    fd: libc::c_int,
    ring: *mut u8,
    map_len: usize,
    frame_size: u32,
    frame_count: u32,
    cursor: u32,
    queued: u32,
    direction: IoDirection,
}

// The raw ring pointer is only ever used by the owning I/O context.
unsafe impl Send for MmapRing {}

impl MmapRing {
    /// Opens an AF_PACKET socket on `ifindex` and maps a ring of at
    /// least `frames` frames in the given direction.
    pub fn open(ifindex: u32, direction: IoDirection, frames: u32) -> io::Result<MmapRing> {
        let fd = unsafe {
            libc::socket(libc::AF_PACKET,
                         libc::SOCK_RAW,
                         (ETH_P_ALL as u16).to_be() as libc::c_int)
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let result = MmapRing::setup(fd, ifindex, direction, frames);
        if result.is_err() {
            unsafe {
                libc::close(fd);
            }
        }
        result
    }

    fn setup(fd: libc::c_int,
             ifindex: u32,
             direction: IoDirection,
             frames: u32)
             -> io::Result<MmapRing> {
        let version = TPACKET_V2;
        if unsafe {
            libc::setsockopt(fd,
                             libc::SOL_PACKET,
                             PACKET_VERSION,
                             &version as *const _ as *const libc::c_void,
                             mem::size_of::<libc::c_int>() as libc::socklen_t)
        } != 0 {
            return Err(io::Error::last_os_error());
        }

        let block_nr = (frames + FRAMES_PER_BLOCK - 1) / FRAMES_PER_BLOCK;
        let frame_count = block_nr * FRAMES_PER_BLOCK;
        let req = TpacketReq {
            tp_block_size: BLOCK_SIZE,
            tp_block_nr: block_nr,
            tp_frame_size: FRAME_SIZE,
            tp_frame_nr: frame_count,
        };
        let option = match direction {
            IoDirection::Ingress => PACKET_RX_RING,
            IoDirection::Egress => PACKET_TX_RING,
        };
        if unsafe {
            libc::setsockopt(fd,
                             libc::SOL_PACKET,
                             option,
                             &req as *const _ as *const libc::c_void,
                             mem::size_of::<TpacketReq>() as libc::socklen_t)
        } != 0 {
            return Err(io::Error::last_os_error());
        }

        let map_len = (BLOCK_SIZE as usize) * (block_nr as usize);
        let ring = unsafe {
            libc::mmap(::std::ptr::null_mut(),
                       map_len,
                       libc::PROT_READ | libc::PROT_WRITE,
                       libc::MAP_SHARED,
                       fd,
                       0)
        };
        if ring == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = (ETH_P_ALL as u16).to_be();
        addr.sll_ifindex = ifindex as libc::c_int;
        if unsafe {
            libc::bind(fd,
                       &addr as *const _ as *const libc::sockaddr,
                       mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t)
        } != 0 {
            let error = io::Error::last_os_error();
            unsafe {
                libc::munmap(ring, map_len);
            }
            return Err(error);
        }

        Ok(MmapRing {
            fd: fd,
            ring: ring as *mut u8,
            map_len: map_len,
            frame_size: FRAME_SIZE,
            frame_count: frame_count,
            cursor: 0,
            queued: 0,
            direction: direction,
        })
    }

    fn header(&self) -> *mut Tpacket2Hdr {
        unsafe {
            self.ring.offset((self.cursor as isize) * (self.frame_size as isize)) as
            *mut Tpacket2Hdr
        }
    }

    fn status(&self) -> u32 {
        let header = self.header();
        unsafe { (*(&(*header).tp_status as *const u32 as *const AtomicU32)).load(Ordering::Acquire) }
    }

    fn set_status(&self, status: u32) {
        let header = self.header();
        unsafe {
            (*(&(*header).tp_status as *const u32 as *const AtomicU32))
                .store(status, Ordering::Release);
        }
    }

    fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.frame_count;
    }

    /// Non-blocking poll to prod the kernel when the ring has nothing
    /// for us (RX) or no room (TX).
    pub fn poll_kernel(&self, events: libc::c_short) {
        let mut pollset = libc::pollfd {
            fd: self.fd,
            events: events,
            revents: 0,
        };
        if unsafe { libc::poll(&mut pollset, 1, 0) } == -1 {
            debug!("ring poll failed: {}", io::Error::last_os_error());
        }
    }

    /// The cursor frame, if it is USER-owned: packet bytes plus the
    /// VLAN tag the kernel stripped.
    pub fn rx_slot(&mut self) -> Option<(&[u8], u16, u16)> {
        debug_assert_eq!(self.direction, IoDirection::Ingress);
        if self.status() & TP_STATUS_USER == 0 {
            return None;
        }
        let header = self.header();
        unsafe {
            let mac = (*header).tp_mac as usize;
            let len = (*header).tp_len as usize;
            let frame = self.ring
                .offset((self.cursor as isize) * (self.frame_size as isize));
            let data = ::std::slice::from_raw_parts(frame.offset(mac as isize), len);
            Some((data, (*header).tp_vlan_tci, (*header).tp_vlan_tpid))
        }
    }

    /// Returns the cursor frame to the kernel and moves on.
    pub fn rx_release(&mut self) {
        self.set_status(TP_STATUS_KERNEL);
        self.advance();
    }

    /// Whether the cursor frame can take a packet right now.
    pub fn tx_ready(&mut self) -> bool {
        debug_assert_eq!(self.direction, IoDirection::Egress);
        self.status() == TP_STATUS_AVAILABLE
    }

    /// Copies one packet into the cursor frame and requests its
    /// transmission. Caller must have seen `tx_ready()`.
    pub fn tx_emit(&mut self, bytes: &[u8]) {
        let header = self.header();
        unsafe {
            let frame = self.ring
                .offset((self.cursor as isize) * (self.frame_size as isize));
            let data = ::std::slice::from_raw_parts_mut(frame.offset(TX_DATA_OFFSET as isize),
                                                        bytes.len());
            data.copy_from_slice(bytes);
            (*header).tp_len = bytes.len() as u32;
        }
        self.set_status(TP_STATUS_SEND_REQUEST);
        self.queued += 1;
        self.advance();
    }

    pub fn queued(&self) -> u32 {
        self.queued
    }

    /// One zero-length send wakes the kernel for everything queued in
    /// this burst. On failure the frames stay queued and drain with
    /// the next successful notify.
    pub fn notify(&mut self) -> io::Result<()> {
        if self.queued == 0 {
            return Ok(());
        }
        let sent = unsafe {
            libc::sendto(self.fd,
                         ::std::ptr::null(),
                         0,
                         0,
                         ::std::ptr::null(),
                         0)
        };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        self.queued = 0;
        Ok(())
    }

    /// Largest packet a TX frame can carry.
    pub fn max_packet_len(&self) -> usize {
        self.frame_size as usize - TX_DATA_OFFSET
    }
}

impl Drop for MmapRing {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ring as *mut libc::c_void, self.map_len);
            libc::close(self.fd);
        }
    }
}
