//! Background execution handling for the realtime connection.

/// Opaque handle for one OS background-execution grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundTaskHandle(pub u64);

/// Starts and ends OS background tasks. The embedding application adapts its
/// platform scheduler to this trait; tests substitute a recording fake.
pub trait BackgroundTaskScheduler: Send {
    /// Requests background execution. Returns `None` when the OS denies the
    /// grant. `expiration` fires if the grant runs out before it is ended.
    fn begin_background_task(
        &mut self,
        expiration: Box<dyn FnOnce() + Send>,
    ) -> Option<BackgroundTaskHandle>;

    fn end_background_task(&mut self, handle: BackgroundTaskHandle);
}

/// What the connection must do in response to a lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleAction {
    KeepAlive,
    Disconnect,
}

/// Tracks app foreground/background transitions and the at-most-one
/// outstanding background task handle. Owned and driven by the connection's
/// driver task; decisions come back as [`LifecycleAction`]s.
pub(crate) struct BackgroundTaskCoordinator {
    scheduler: Option<Box<dyn BackgroundTaskScheduler>>,
    stays_connected: bool,
    active_task: Option<BackgroundTaskHandle>,
}

impl BackgroundTaskCoordinator {
    pub(crate) fn new(
        scheduler: Option<Box<dyn BackgroundTaskScheduler>>,
        stays_connected: bool,
    ) -> Self {
        Self {
            scheduler,
            stays_connected,
            active_task: None,
        }
    }

    /// The app moved to the background. Tries to keep the socket alive under
    /// an OS grant; anything short of that means disconnect.
    pub(crate) fn app_did_enter_background(
        &mut self,
        connection_active: bool,
        expiration: Box<dyn FnOnce() + Send>,
    ) -> LifecycleAction {
        if !connection_active {
            return LifecycleAction::KeepAlive;
        }
        if !self.stays_connected {
            return LifecycleAction::Disconnect;
        }
        let Some(scheduler) = self.scheduler.as_mut() else {
            return LifecycleAction::Disconnect;
        };
        match scheduler.begin_background_task(expiration) {
            Some(handle) => {
                tracing::debug!("background task granted, keeping socket alive");
                self.active_task = Some(handle);
                LifecycleAction::KeepAlive
            }
            None => {
                tracing::debug!("background task denied, closing socket");
                LifecycleAction::Disconnect
            }
        }
    }

    /// The app returned to the foreground; the grant is no longer needed.
    pub(crate) fn app_did_become_active(&mut self) {
        self.end_active_task();
    }

    /// The OS expired the grant. The handle must still be ended explicitly.
    pub(crate) fn task_expired(&mut self) {
        self.end_active_task();
    }

    /// The connection closed for any reason; release the grant if one is
    /// outstanding.
    pub(crate) fn cancel_task_if_needed(&mut self) {
        self.end_active_task();
    }

    fn end_active_task(&mut self) {
        if let Some(handle) = self.active_task.take() {
            if let Some(scheduler) = self.scheduler.as_mut() {
                scheduler.end_background_task(handle);
            }
        }
    }
}
