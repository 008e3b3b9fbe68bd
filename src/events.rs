
use {
    crate::{
        attributes::DpyAttribute,
        connection::{DeviceHandle, DispHandle},
        dpy::DpyId,
        framelock::FrameLockAttribute,
    },
    num_derive::FromPrimitive,
    parking_lot::{Condvar, Mutex},
    std::{
        collections::VecDeque,
        time::{Duration, Instant},
    },
};

const MAX_QUEUED_EVENTS: usize = 1024;

#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
pub enum EventType {
    DpyChanged = 0,
    DynamicDpyConnected = 1,
    DynamicDpyDisconnected = 2,
    DpyAttributeChanged = 3,
    FrameLockAttributeChanged = 4,
    FlipOccurred = 5,
}

bitflags! {
    EventMask: u32;
    EVENT_DPY_CHANGED = 1 << EventType::DpyChanged as u32,
    EVENT_DYNAMIC_DPY_CONNECTED = 1 << EventType::DynamicDpyConnected as u32,
    EVENT_DYNAMIC_DPY_DISCONNECTED = 1 << EventType::DynamicDpyDisconnected as u32,
    EVENT_DPY_ATTRIBUTE_CHANGED = 1 << EventType::DpyAttributeChanged as u32,
    EVENT_FRAMELOCK_ATTRIBUTE_CHANGED = 1 << EventType::FrameLockAttributeChanged as u32,
    EVENT_FLIP_OCCURRED = 1 << EventType::FlipOccurred as u32,
}

impl EventType {
    pub fn mask(self) -> EventMask {
        EventMask(1 << self as u32)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    DpyChanged {
        device: DeviceHandle,
        disp: DispHandle,
        dpy: DpyId,
    },
    DynamicDpyConnected {
        device: DeviceHandle,
        disp: DispHandle,
        dpy: DpyId,
    },
    DynamicDpyDisconnected {
        device: DeviceHandle,
        disp: DispHandle,
        dpy: DpyId,
    },
    DpyAttributeChanged {
        device: DeviceHandle,
        disp: DispHandle,
        dpy: DpyId,
        attribute: DpyAttribute,
        value: i64,
    },
    FrameLockAttributeChanged {
        device: DeviceHandle,
        framelock: usize,
        attribute: FrameLockAttribute,
        value: i64,
    },
    FlipOccurred {
        device: DeviceHandle,
        disp: DispHandle,
        head: usize,
        layer: usize,
    },
}

impl Event {
    pub fn ty(&self) -> EventType {
        match self {
            Event::DpyChanged { .. } => EventType::DpyChanged,
            Event::DynamicDpyConnected { .. } => EventType::DynamicDpyConnected,
            Event::DynamicDpyDisconnected { .. } => EventType::DynamicDpyDisconnected,
            Event::DpyAttributeChanged { .. } => EventType::DpyAttributeChanged,
            Event::FrameLockAttributeChanged { .. } => EventType::FrameLockAttributeChanged,
            Event::FlipOccurred { .. } => EventType::FlipOccurred,
        }
    }
}

struct QueueState {
    interest: EventMask,
    events: VecDeque<Event>,
}

/// The shared event queue of a connection.
pub struct EventQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState {
                interest: EventMask::all(),
                events: Default::default(),
            }),
            cond: Default::default(),
        }
    }
}

impl EventQueue {
    pub fn set_interest(&self, mask: EventMask) {
        let mut state = self.state.lock();
        state.interest = mask;
        state.events.retain(|e| mask.contains(e.ty().mask()));
    }

    pub fn interest(&self) -> EventMask {
        self.state.lock().interest
    }

    pub fn push(&self, event: Event) {
        let mut state = self.state.lock();
        if !state.interest.contains(event.ty().mask()) {
            return;
        }
        if state.events.len() >= MAX_QUEUED_EVENTS {
            log::warn!("Event queue overflow. Dropping {:?}", state.events.front());
            state.events.pop_front();
        }
        state.events.push_back(event);
        self.cond.notify_one();
    }

    pub fn next(&self) -> Option<Event> {
        self.state.lock().events.pop_front()
    }

    pub fn wait(&self, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(e) = state.events.pop_front() {
                return Some(e);
            }
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return state.events.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }
}

/// An event that is delivered to a single waiter instead of the shared queue.
#[derive(Default)]
pub struct UnicastEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl UnicastEvent {
    pub fn signal(&self) {
        *self.signaled.lock() = true;
        self.cond.notify_all();
    }

    pub fn clear(&self) {
        *self.signaled.lock() = false;
    }

    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }

    /// Waits until the event is signaled and consumes the signal.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *signaled, false)
    }
}
