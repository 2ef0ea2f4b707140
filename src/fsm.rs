// SPDX-License-Identifier: Apache-2.0

use std::net::{Ipv6Addr, SocketAddrV6};

use crate::{
    device::{DhcpV6Device, LladdrCheck},
    engine::DhcpV6LeaseEvent,
    event::{DhcpEventPool, DhcpV6Event, DhcpV6EventKind},
    msg::DhcpV6MessageType,
    netinfo::is_ipv6_unicast_link_local,
    policy::{score_advertise, SELECT_IMMEDIATE_WEIGHT},
    retransmit::RetransParams,
    socket::{multicast_dest, unicast_dest},
    DhcpError, DhcpV6Config, DhcpV6EngineConfig, DhcpV6Lease, DhcpV6Message,
    DhcpV6Option, DhcpV6OptionCode, DhcpV6State, ErrorKind, NetInfo,
};

// RFC 3315 section 5.5, transmission and retransmission parameters in
// milliseconds.
const SOL_PARAMS: RetransParams = RetransParams {
    irt_ms: 1000,
    mrt_ms: 120_000,
    mrc: 0,
    mrd_ms: 0,
    delay_ms: 1000,
};
const REQ_PARAMS: RetransParams = RetransParams {
    irt_ms: 1000,
    mrt_ms: 30_000,
    mrc: 10,
    mrd_ms: 0,
    delay_ms: 0,
};
const CNF_PARAMS: RetransParams = RetransParams {
    irt_ms: 1000,
    mrt_ms: 4000,
    mrc: 0,
    mrd_ms: 10_000,
    delay_ms: 1000,
};
const REN_PARAMS: RetransParams = RetransParams {
    irt_ms: 10_000,
    mrt_ms: 600_000,
    mrc: 0,
    mrd_ms: 0,
    delay_ms: 0,
};
const REB_PARAMS: RetransParams = RetransParams {
    irt_ms: 10_000,
    mrt_ms: 600_000,
    mrc: 0,
    mrd_ms: 0,
    delay_ms: 0,
};
const INF_PARAMS: RetransParams = RetransParams {
    irt_ms: 1000,
    mrt_ms: 120_000,
    mrc: 0,
    mrd_ms: 0,
    delay_ms: 1000,
};
const DEC_PARAMS: RetransParams = RetransParams {
    irt_ms: 1000,
    mrt_ms: 0,
    mrc: 5,
    mrd_ms: 0,
    delay_ms: 0,
};

// How long to wait until the link-local address is ready to use.
pub(crate) const WAIT_READY_MSEC: u64 = 2000;

// The elapsed-time option is a 16 bit count of hundredths of a second.
const ELAPSED_TIME_CLAMP: u32 = 0xFFFF;

/// Engine state the FSM of one device operates against.
pub(crate) struct FsmContext<'a> {
    pub(crate) pool: &'a mut DhcpEventPool,
    pub(crate) netinfo: &'a dyn NetInfo,
    pub(crate) conf: &'a DhcpV6EngineConfig,
    pub(crate) emits: &'a mut Vec<DhcpV6LeaseEvent>,
}

impl DhcpV6Device {
    fn event(&self, kind: DhcpV6EventKind) -> DhcpV6Event {
        DhcpV6Event {
            ifindex: self.ifindex,
            kind,
        }
    }

    fn config_uuid(&self) -> u128 {
        self.config.as_ref().map(|c| c.uuid).unwrap_or_default()
    }

    fn config_or_bug(&self) -> Result<&DhcpV6Config, DhcpError> {
        self.config.as_ref().ok_or_else(|| {
            DhcpError::new(
                ErrorKind::Bug,
                format!("{}: FSM running without config", self.ifname),
            )
        })
    }

    /// Install a new acquisition config and start, or wait for the
    /// link-local address to become usable.
    pub(crate) fn fsm_acquire(
        &mut self,
        ctx: &mut FsmContext,
        config: DhcpV6Config,
    ) -> Result<(), DhcpError> {
        match self.find_lladdr(ctx.netinfo)? {
            LladdrCheck::Ready(_) => {
                self.set_config(Some(config));
                self.fsm_start(ctx)
            }
            LladdrCheck::Wait => {
                self.set_config(Some(config));
                self.state = DhcpV6State::WaitReady;
                self.fail_on_timeout = true;
                ctx.pool.add_timer(
                    self.event(DhcpV6EventKind::FsmTimeout),
                    WAIT_READY_MSEC,
                )
            }
        }
    }

    /// Start the configured exchange: Information-request for info-only
    /// configs, Solicit otherwise.
    pub(crate) fn fsm_start(
        &mut self,
        ctx: &mut FsmContext,
    ) -> Result<(), DhcpError> {
        let info_only = self.config_or_bug()?.info_only;
        self.alloc_buffer();
        self.fail_on_timeout = false;
        if info_only {
            self.state = DhcpV6State::InfoRequest;
            self.retrans.set_params(INF_PARAMS);
        } else {
            self.state = DhcpV6State::Selecting;
            self.retrans.set_params(SOL_PARAMS);
        }
        self.regen_xid();
        log::debug!(
            "{}: Starting DHCPv6 {} exchange with xid {:#08x}",
            self.ifname,
            self.state,
            self.xid
        );
        self.transmit_init(ctx)
    }

    fn transmit_init(
        &mut self,
        ctx: &mut FsmContext,
    ) -> Result<(), DhcpError> {
        if let Some(delay) = self.retrans.initial_delay() {
            log::debug!(
                "{}: Delaying initial transmit by {delay} msec",
                self.ifname
            );
            return ctx
                .pool
                .add_timer(self.event(DhcpV6EventKind::FsmTimeout), delay);
        }
        self.transmit_start(ctx)
    }

    fn transmit_start(
        &mut self,
        ctx: &mut FsmContext,
    ) -> Result<(), DhcpError> {
        // RFC 3315 17.1.2: the first Solicit RT MUST be strictly greater
        // than IRT; Advertise messages are collected until it elapses.
        // While Selecting, one timer drives both the collection deadline
        // and the resends, so a queued Solicit resend can never race the
        // offer selection.
        let selecting = self.state == DhcpV6State::Selecting;
        let rt = self.retrans.arm_first(selecting);
        if selecting {
            ctx.pool
                .add_timer(self.event(DhcpV6EventKind::FsmTimeout), rt)?;
        } else {
            if self.retrans.params.mrd_ms > 0 {
                ctx.pool.add_timer(
                    self.event(DhcpV6EventKind::FsmTimeout),
                    self.retrans.params.mrd_ms,
                )?;
            }
            ctx.pool
                .add_timer(self.event(DhcpV6EventKind::Retransmit), rt)?;
        }
        if let Err(e) = self.transmit(ctx) {
            return self.fsm_fail(ctx, e);
        }
        Ok(())
    }

    /// Build and send the message of the current state, reusing the
    /// outbound buffer.
    fn transmit(&mut self, ctx: &mut FsmContext) -> Result<(), DhcpError> {
        let msg = self.build_message()?;
        self.alloc_buffer();
        msg.emit_to(&mut self.msg_buf);

        self.open_transport()?;
        if let Some(fd) =
            self.transport.as_ref().and_then(|transport| transport.raw_fd())
        {
            ctx.pool
                .add_socket(self.event(DhcpV6EventKind::UdpPackageIn), fd)?;
        }

        let dest = self.dest();
        let transport = match self.transport.as_mut() {
            Some(t) => t,
            None => {
                return Err(DhcpError::new(
                    ErrorKind::Bug,
                    format!("{}: transmit without transport", self.ifname),
                ))
            }
        };
        match transport.send_to(self.msg_buf.data.as_slice(), &dest) {
            Ok(_) => {
                self.retrans.record_send();
                log::debug!(
                    "{}: {} message #{} with xid {:#08x} sent to {dest}",
                    self.ifname,
                    msg.msg_type,
                    self.retrans.count,
                    self.xid
                );
                self.clear_buffer();
                Ok(())
            }
            Err(e) => {
                log::error!(
                    "{}: Unable to send {} message #{}: {e}",
                    self.ifname,
                    msg.msg_type,
                    self.retrans.count + 1
                );
                self.close();
                Err(e)
            }
        }
    }

    /// Message destination: the All_DHCP_Relay_Agents_and_Servers group
    /// unless the server allows unicast for this exchange.
    fn dest(&self) -> SocketAddrV6 {
        if matches!(
            self.state,
            DhcpV6State::Renewing
                | DhcpV6State::Releasing
                | DhcpV6State::Declining
        ) {
            if let Some(srv_unicast) =
                self.lease.as_ref().and_then(|lease| lease.srv_unicast)
            {
                return unicast_dest(srv_unicast);
            }
        }
        multicast_dest(self.ifindex)
    }

    fn build_message(&self) -> Result<DhcpV6Message, DhcpError> {
        let config = self.config_or_bug()?;
        let msg_type = match self.state {
            DhcpV6State::Selecting => DhcpV6MessageType::Solicit,
            DhcpV6State::Requesting => DhcpV6MessageType::Request,
            DhcpV6State::Renewing => DhcpV6MessageType::Renew,
            DhcpV6State::Rebinding => DhcpV6MessageType::Rebind,
            DhcpV6State::Confirming => DhcpV6MessageType::Confirm,
            DhcpV6State::Declining => DhcpV6MessageType::Decline,
            DhcpV6State::InfoRequest => {
                DhcpV6MessageType::InformationRequest
            }
            DhcpV6State::Releasing => DhcpV6MessageType::Release,
            state => {
                return Err(DhcpError::new(
                    ErrorKind::Bug,
                    format!(
                        "{}: No DHCPv6 message to build in state {state}",
                        self.ifname
                    ),
                ))
            }
        };

        let mut msg = DhcpV6Message::new(msg_type, self.xid);
        msg.add_option(DhcpV6Option::ClientId(config.duid.clone()));
        msg.add_option(DhcpV6Option::ElapsedTime(
            self.uptime(ELAPSED_TIME_CLAMP) as u16,
        ));

        match msg_type {
            DhcpV6MessageType::Solicit => {
                msg.add_option(DhcpV6Option::OptionRequestOption(
                    config.request_opts.clone(),
                ));
                for ia in &config.ia_list {
                    msg.add_option(ia.to_option());
                }
                if config.rapid_commit {
                    msg.add_option(DhcpV6Option::RapidCommit);
                }
                msg.add_option(DhcpV6Option::ReconfigureAccept);
                self.add_client_info_options(config, &mut msg);
            }
            DhcpV6MessageType::Request => {
                let offer =
                    self.best_offer.lease.as_ref().ok_or_else(|| {
                        DhcpError::new(
                            ErrorKind::Bug,
                            format!(
                                "{}: Requesting without best offer",
                                self.ifname
                            ),
                        )
                    })?;
                msg.add_option(DhcpV6Option::ServerId(
                    offer.srv_duid.clone(),
                ));
                msg.add_option(DhcpV6Option::OptionRequestOption(
                    config.request_opts.clone(),
                ));
                for opt in lease_ia_options(offer) {
                    msg.add_option(opt);
                }
                self.add_client_info_options(config, &mut msg);
            }
            DhcpV6MessageType::Renew
            | DhcpV6MessageType::Release
            | DhcpV6MessageType::Decline => {
                let lease = self.lease_or_bug()?;
                msg.add_option(DhcpV6Option::ServerId(
                    lease.srv_duid.clone(),
                ));
                if msg_type == DhcpV6MessageType::Renew {
                    msg.add_option(DhcpV6Option::OptionRequestOption(
                        config.request_opts.clone(),
                    ));
                }
                for opt in lease_ia_options(lease) {
                    msg.add_option(opt);
                }
            }
            DhcpV6MessageType::Rebind | DhcpV6MessageType::Confirm => {
                let lease = self.lease_or_bug()?;
                if msg_type == DhcpV6MessageType::Rebind {
                    msg.add_option(DhcpV6Option::OptionRequestOption(
                        config.request_opts.clone(),
                    ));
                }
                for opt in lease_ia_options(lease) {
                    msg.add_option(opt);
                }
            }
            DhcpV6MessageType::InformationRequest => {
                msg.add_option(DhcpV6Option::OptionRequestOption(
                    config.request_opts.clone(),
                ));
                self.add_client_info_options(config, &mut msg);
            }
            _ => (),
        }
        Ok(msg)
    }

    fn add_client_info_options(
        &self,
        config: &DhcpV6Config,
        msg: &mut DhcpV6Message,
    ) {
        if let Some(hostname) = config.hostname.as_ref() {
            // S bit: ask the server to perform the AAAA update.
            msg.add_option(DhcpV6Option::Fqdn(0x01, hostname.clone()));
        }
        if !config.user_class.is_empty() {
            msg.add_option(DhcpV6Option::UserClass(
                config.user_class.clone(),
            ));
        }
        msg.add_option(DhcpV6Option::VendorClass(
            config.vendor_class.clone(),
        ));
        if let Some(vendor_opts) = config.vendor_opts.as_ref() {
            msg.add_option(DhcpV6Option::VendorOpts(vendor_opts.clone()));
        }
    }

    fn lease_or_bug(&self) -> Result<&DhcpV6Lease, DhcpError> {
        self.lease.as_ref().ok_or_else(|| {
            DhcpError::new(
                ErrorKind::Bug,
                format!(
                    "{}: FSM in state {} without lease",
                    self.ifname, self.state
                ),
            )
        })
    }

    /// FSM timer: initial transmit delay, wait-ready deadline, first RT in
    /// Selecting or maximum retransmission duration.
    pub(crate) fn fsm_timeout(
        &mut self,
        ctx: &mut FsmContext,
    ) -> Result<(), DhcpError> {
        if self.state == DhcpV6State::WaitReady {
            if self.fail_on_timeout {
                return self.fsm_fail(
                    ctx,
                    DhcpError::new(
                        ErrorKind::NoLinkLocal,
                        format!(
                            "{}: Link-local IPv6 address did not become \
                             usable within {WAIT_READY_MSEC} msec",
                            self.ifname
                        ),
                    ),
                );
            }
            return Ok(());
        }

        // Initial delay elapsed, first transmission is due now.
        if !self.retrans.start.is_set() && self.retrans.delay_ms > 0 {
            return self.transmit_start(ctx);
        }

        match self.state {
            DhcpV6State::Selecting => {
                // First RT elapsed: act on the best collected Advertise,
                // or advance the backoff and solicit again.
                if self.best_offer.lease.is_some() {
                    self.fsm_select_best_offer(ctx)
                } else {
                    self.fsm_retransmit_tick(
                        ctx,
                        DhcpV6EventKind::FsmTimeout,
                    )
                }
            }
            DhcpV6State::Confirming => {
                if self.retrans.mrd_expired() {
                    log::info!(
                        "{}: No Reply to Confirm within MRD, restarting \
                         server discovery",
                        self.ifname
                    );
                    self.fsm_restart(ctx, true)
                } else {
                    Ok(())
                }
            }
            DhcpV6State::Renewing | DhcpV6State::Rebinding => {
                if self.retrans.mrd_expired() {
                    self.fsm_mrd_expired(ctx)
                } else {
                    Ok(())
                }
            }
            state => {
                log::debug!(
                    "{}: Spurious FSM timeout in state {state}",
                    self.ifname
                );
                Ok(())
            }
        }
    }

    /// Retransmission deadline elapsed, advance the backoff and send
    /// again, or give up per MRC/MRD. Selecting resends ride on the FSM
    /// timer instead, a retransmit event there is stale.
    pub(crate) fn fsm_retransmit(
        &mut self,
        ctx: &mut FsmContext,
    ) -> Result<(), DhcpError> {
        if !self.state.is_retransmitting()
            || self.state == DhcpV6State::Selecting
            || !self.retrans.start.is_set()
        {
            log::debug!(
                "{}: Stale retransmit timer in state {}",
                self.ifname,
                self.state
            );
            return Ok(());
        }
        self.fsm_retransmit_tick(ctx, DhcpV6EventKind::Retransmit)
    }

    /// Advance the backoff, re-arm the driving timer and send again.
    fn fsm_retransmit_tick(
        &mut self,
        ctx: &mut FsmContext,
        timer: DhcpV6EventKind,
    ) -> Result<(), DhcpError> {
        if self.retrans.mrd_expired() {
            return self.fsm_mrd_expired(ctx);
        }
        match self.retrans.advance() {
            Some(rt) => {
                log::debug!(
                    "{}: Retransmission timeout increased to {rt} msec",
                    self.ifname
                );
                ctx.pool.add_timer(self.event(timer), rt)?;
                if let Err(e) = self.transmit(ctx) {
                    return self.fsm_fail(ctx, e);
                }
                Ok(())
            }
            None => self.fsm_mrc_exceeded(ctx),
        }
    }

    fn fsm_mrc_exceeded(
        &mut self,
        ctx: &mut FsmContext,
    ) -> Result<(), DhcpError> {
        match self.state {
            DhcpV6State::Requesting => {
                log::info!(
                    "{}: No Reply to Request after {} attempts, dropping \
                     offer and restarting server discovery",
                    self.ifname,
                    self.retrans.count
                );
                self.drop_best_offer();
                self.fsm_restart(ctx, false)
            }
            DhcpV6State::Declining => {
                log::info!(
                    "{}: Giving up on Decline after {} attempts",
                    self.ifname,
                    self.retrans.count
                );
                self.fsm_restart(ctx, true)
            }
            state => self.fsm_fail(
                ctx,
                DhcpError::new(
                    ErrorKind::MrcExceeded,
                    format!(
                        "{}: Maximum retransmission count exceeded in \
                         state {state}",
                        self.ifname
                    ),
                ),
            ),
        }
    }

    fn fsm_mrd_expired(
        &mut self,
        ctx: &mut FsmContext,
    ) -> Result<(), DhcpError> {
        match self.state {
            DhcpV6State::Confirming => {
                log::info!(
                    "{}: Confirm exchange exceeded MRD, restarting server \
                     discovery",
                    self.ifname
                );
                self.fsm_restart(ctx, true)
            }
            // Renewal is bounded by T2, rebind by the valid lifetime. The
            // lease timers drive the same transitions, MRD only catches a
            // retransmission racing them.
            DhcpV6State::Renewing => self.fsm_t2(ctx),
            DhcpV6State::Rebinding => self.fsm_lease_expired(ctx),
            state => self.fsm_fail(
                ctx,
                DhcpError::new(
                    ErrorKind::MrdExpired,
                    format!(
                        "{}: Maximum retransmission duration exceeded in \
                         state {state}",
                        self.ifname
                    ),
                ),
            ),
        }
    }

    /// Lease T1 elapsed.
    pub(crate) fn fsm_t1(
        &mut self,
        ctx: &mut FsmContext,
    ) -> Result<(), DhcpError> {
        if self.state != DhcpV6State::Bound {
            return Ok(());
        }
        let lease = self.lease_or_bug()?;
        let mut params = REN_PARAMS;
        // Renewal is bounded by T2, then the rebind timer takes over.
        let (t1, t2) = (lease.t1_sec(), lease.t2_sec());
        if t2 > t1 {
            params.mrd_ms = (t2 - t1) as u64 * 1000;
        }
        log::debug!("{}: T1 expired, renewing lease", self.ifname);
        self.state = DhcpV6State::Renewing;
        self.retrans.set_params(params);
        self.regen_xid();
        self.transmit_init(ctx)
    }

    /// Lease T2 elapsed, switch to multicast Rebind.
    pub(crate) fn fsm_t2(
        &mut self,
        ctx: &mut FsmContext,
    ) -> Result<(), DhcpError> {
        if !matches!(
            self.state,
            DhcpV6State::Bound | DhcpV6State::Renewing
        ) {
            return Ok(());
        }
        let lease = self.lease_or_bug()?;
        let mut params = REB_PARAMS;
        let (t2, valid) = (lease.t2_sec(), lease.valid_sec());
        if valid > t2 {
            params.mrd_ms = (valid - t2) as u64 * 1000;
        }
        log::debug!("{}: T2 expired, rebinding lease", self.ifname);
        self.state = DhcpV6State::Rebinding;
        self.retrans.set_params(params);
        self.regen_xid();
        self.transmit_init(ctx)
    }

    /// Lease valid lifetime elapsed.
    pub(crate) fn fsm_lease_expired(
        &mut self,
        ctx: &mut FsmContext,
    ) -> Result<(), DhcpError> {
        log::info!("{}: Lease valid lifetime expired", self.ifname);
        self.fsm_restart(ctx, true)
    }

    /// An inbound packet of this device.
    pub(crate) fn process_packet(
        &mut self,
        ctx: &mut FsmContext,
        payload: &[u8],
        src_ip: Ipv6Addr,
    ) -> Result<(), DhcpError> {
        let msg = match DhcpV6Message::parse(payload) {
            Ok(msg) => msg,
            Err(e) => {
                // A malformed packet never changes state.
                log::debug!(
                    "{}: Dropping unparsable DHCPv6 packet from {src_ip}: \
                     {e}",
                    self.ifname
                );
                return Ok(());
            }
        };
        if msg.xid() != self.xid {
            log::debug!(
                "{}: Dropping DHCPv6 {} with xid {:#08x}, expecting {:#08x}",
                self.ifname,
                msg.msg_type,
                msg.xid(),
                self.xid
            );
            return Ok(());
        }

        match (self.state, msg.msg_type) {
            (DhcpV6State::Selecting, DhcpV6MessageType::Advertise) => {
                self.handle_advertise(ctx, &msg, src_ip)
            }
            (DhcpV6State::Selecting, DhcpV6MessageType::Reply) => {
                self.handle_rapid_commit_reply(ctx, &msg, src_ip)
            }
            (DhcpV6State::Requesting, DhcpV6MessageType::Reply)
            | (DhcpV6State::ValidateOffer, DhcpV6MessageType::Reply) => {
                self.handle_requesting_reply(ctx, &msg, src_ip)
            }
            (
                DhcpV6State::Renewing | DhcpV6State::Rebinding,
                DhcpV6MessageType::Reply,
            ) => self.handle_refresh_reply(ctx, &msg, src_ip),
            (DhcpV6State::Confirming, DhcpV6MessageType::Reply) => {
                self.handle_confirm_reply(ctx, &msg)
            }
            (DhcpV6State::InfoRequest, DhcpV6MessageType::Reply) => {
                self.handle_info_reply(ctx, &msg, src_ip)
            }
            (DhcpV6State::Declining, DhcpV6MessageType::Reply) => {
                log::debug!(
                    "{}: Server acknowledged Decline",
                    self.ifname
                );
                self.fsm_restart(ctx, true)
            }
            (state, msg_type) => {
                log::debug!(
                    "{}: Dropping unexpected DHCPv6 {msg_type} in state \
                     {state}",
                    self.ifname
                );
                Ok(())
            }
        }
    }

    fn handle_advertise(
        &mut self,
        ctx: &mut FsmContext,
        msg: &DhcpV6Message,
        src_ip: Ipv6Addr,
    ) -> Result<(), DhcpError> {
        let lease = match DhcpV6Lease::new_from_msg(
            msg,
            src_ip,
            self.config_uuid(),
            false,
        ) {
            Ok(lease) => lease,
            Err(e) => {
                log::info!(
                    "{}: Ignoring unusable Advertise from {src_ip}: {e}",
                    self.ifname
                );
                return Ok(());
            }
        };
        let weight = match score_advertise(
            ctx.conf,
            &src_ip,
            &lease.srv_duid,
            lease.preference,
        ) {
            Some(weight) => weight,
            None => return Ok(()),
        };
        if self.best_offer.update(lease, weight) {
            log::debug!(
                "{}: New best offer from {src_ip} with weight {weight}",
                self.ifname
            );
        }

        // RFC 3315 17.1.3: preference 255 terminates the collection wait.
        // Past the first RT any acceptable Advertise is acted on at once.
        if weight >= SELECT_IMMEDIATE_WEIGHT || self.retrans.count > 1 {
            self.fsm_select_best_offer(ctx)?;
        }
        Ok(())
    }

    fn handle_rapid_commit_reply(
        &mut self,
        ctx: &mut FsmContext,
        msg: &DhcpV6Message,
        src_ip: Ipv6Addr,
    ) -> Result<(), DhcpError> {
        let rapid_commit =
            self.config_or_bug()?.rapid_commit
                && msg.has_option(DhcpV6OptionCode::RapidCommit);
        if !rapid_commit {
            log::debug!(
                "{}: Dropping Reply without rapid commit while Selecting",
                self.ifname
            );
            return Ok(());
        }
        self.state = DhcpV6State::ValidateOffer;
        match self.validate_reply(msg, src_ip, None) {
            Ok(lease) => self.commit_lease(ctx, lease),
            Err(e) => {
                log::info!(
                    "{}: Ignoring invalid rapid commit Reply: {e}",
                    self.ifname
                );
                self.state = DhcpV6State::Selecting;
                Ok(())
            }
        }
    }

    fn handle_requesting_reply(
        &mut self,
        ctx: &mut FsmContext,
        msg: &DhcpV6Message,
        src_ip: Ipv6Addr,
    ) -> Result<(), DhcpError> {
        self.state = DhcpV6State::ValidateOffer;
        let expected_srv_duid = self
            .best_offer
            .lease
            .as_ref()
            .map(|offer| offer.srv_duid.clone());
        match self.validate_reply(msg, src_ip, expected_srv_duid.as_ref()) {
            Ok(lease) => self.commit_lease(ctx, lease),
            Err(e) => {
                if let ErrorKind::ServerRejected(status) = e.kind() {
                    log::info!(
                        "{}: Server rejected Request with {status}, \
                         restarting server discovery",
                        self.ifname
                    );
                    self.drop_best_offer();
                    return self.fsm_restart(ctx, false);
                }
                log::info!(
                    "{}: Ignoring invalid Reply while Requesting: {e}",
                    self.ifname
                );
                self.state = DhcpV6State::Requesting;
                Ok(())
            }
        }
    }

    fn handle_refresh_reply(
        &mut self,
        ctx: &mut FsmContext,
        msg: &DhcpV6Message,
        src_ip: Ipv6Addr,
    ) -> Result<(), DhcpError> {
        match self.validate_reply(msg, src_ip, None) {
            Ok(lease) => self.commit_lease(ctx, lease),
            Err(e) => {
                if let ErrorKind::ServerRejected(status) = e.kind() {
                    log::info!(
                        "{}: Server rejected lease refresh with {status}, \
                         restarting server discovery",
                        self.ifname
                    );
                    return self.fsm_restart(ctx, true);
                }
                log::info!(
                    "{}: Ignoring invalid Reply in state {}: {e}",
                    self.ifname,
                    self.state
                );
                Ok(())
            }
        }
    }

    fn handle_confirm_reply(
        &mut self,
        ctx: &mut FsmContext,
        msg: &DhcpV6Message,
    ) -> Result<(), DhcpError> {
        if let Some(DhcpV6Option::StatusCode(status)) =
            msg.get_option_first(DhcpV6OptionCode::StatusCode)
        {
            if status.is_not_on_link() {
                log::info!(
                    "{}: Confirm answered with {}, dropping lease",
                    self.ifname,
                    status.status
                );
                return self.fsm_restart(ctx, true);
            }
            if !status.is_success() {
                // Not a binding verdict; keep confirming until MRD.
                log::info!(
                    "{}: Ignoring Confirm Reply with {}",
                    self.ifname,
                    status.status
                );
                return Ok(());
            }
        }
        log::debug!(
            "{}: Server confirmed lease is still valid on this link",
            self.ifname
        );
        self.retrans.disarm();
        self.xid = 0;
        ctx.pool
            .del_timer(self.event(DhcpV6EventKind::Retransmit))?;
        ctx.pool
            .del_timer(self.event(DhcpV6EventKind::FsmTimeout))?;
        self.state = DhcpV6State::Bound;
        Ok(())
    }

    fn handle_info_reply(
        &mut self,
        ctx: &mut FsmContext,
        msg: &DhcpV6Message,
        src_ip: Ipv6Addr,
    ) -> Result<(), DhcpError> {
        match DhcpV6Lease::new_from_msg(msg, src_ip, self.config_uuid(), true)
        {
            Ok(lease) => self.commit_lease(ctx, lease),
            Err(e) => {
                log::info!(
                    "{}: Ignoring invalid Information-request Reply: {e}",
                    self.ifname
                );
                Ok(())
            }
        }
    }

    /// Validate a Reply against the running exchange: the server DUID echo
    /// must match the selected server and the client id echo must be ours.
    fn validate_reply(
        &self,
        msg: &DhcpV6Message,
        src_ip: Ipv6Addr,
        expected_srv_duid: Option<&crate::DhcpV6Duid>,
    ) -> Result<DhcpV6Lease, DhcpError> {
        let config = self.config_or_bug()?;
        let lease = DhcpV6Lease::new_from_msg(
            msg,
            src_ip,
            config.uuid,
            config.info_only,
        )?;
        if !lease.cli_duid.is_empty() && lease.cli_duid != config.duid {
            return Err(DhcpError::new(
                ErrorKind::InvalidDhcpMessage,
                format!(
                    "{}: Reply echoes foreign client DUID {}",
                    self.ifname, lease.cli_duid
                ),
            ));
        }
        if let Some(expected) = expected_srv_duid {
            if &lease.srv_duid != expected {
                return Err(DhcpError::new(
                    ErrorKind::InvalidDhcpMessage,
                    format!(
                        "{}: Reply from server {} instead of the selected \
                         {expected}",
                        self.ifname, lease.srv_duid
                    ),
                ));
            }
        }
        Ok(lease)
    }

    /// First RT elapsed or shortcut taken: move on to Requesting the best
    /// collected offer.
    fn fsm_select_best_offer(
        &mut self,
        ctx: &mut FsmContext,
    ) -> Result<(), DhcpError> {
        let weight = self.best_offer.weight;
        if self.best_offer.lease.is_none() {
            return Ok(());
        }
        log::debug!(
            "{}: Selecting best offer with weight {weight}",
            self.ifname
        );
        ctx.pool
            .del_timer(self.event(DhcpV6EventKind::FsmTimeout))?;
        self.state = DhcpV6State::Requesting;
        self.retrans.set_params(REQ_PARAMS);
        self.regen_xid();
        self.transmit_init(ctx)
    }

    /// Commit a validated lease and go Bound.
    fn commit_lease(
        &mut self,
        ctx: &mut FsmContext,
        lease: DhcpV6Lease,
    ) -> Result<(), DhcpError> {
        self.retrans.disarm();
        self.xid = 0;
        ctx.pool
            .del_timer(self.event(DhcpV6EventKind::Retransmit))?;
        ctx.pool
            .del_timer(self.event(DhcpV6EventKind::FsmTimeout))?;
        self.drop_best_offer();

        let t1 = lease.t1_sec();
        let t2 = lease.t2_sec();
        let valid = lease.valid_sec();
        if t1 > 0 {
            ctx.pool.add_timer(
                self.event(DhcpV6EventKind::Renew),
                t1 as u64 * 1000,
            )?;
        }
        if t2 > 0 {
            ctx.pool.add_timer(
                self.event(DhcpV6EventKind::Rebind),
                t2 as u64 * 1000,
            )?;
        }
        if valid > 0 {
            ctx.pool.add_timer(
                self.event(DhcpV6EventKind::LeaseExpired),
                valid as u64 * 1000,
            )?;
        }

        log::info!(
            "{}: DHCPv6 lease committed, T1 {t1} secs, T2 {t2} secs, \
             valid {valid} secs",
            self.ifname
        );
        self.set_lease(Some(lease.clone()));
        self.state = DhcpV6State::Bound;
        ctx.emits.push(DhcpV6LeaseEvent::LeaseAcquired {
            ifindex: self.ifindex,
            uuid: lease.uuid,
            lease,
        });
        Ok(())
    }

    /// Drop the running exchange (and optionally the lease) and discover
    /// servers from scratch.
    fn fsm_restart(
        &mut self,
        ctx: &mut FsmContext,
        drop_lease: bool,
    ) -> Result<(), DhcpError> {
        if drop_lease && self.lease.is_some() {
            self.drop_lease(ctx.conf.lease_dir.as_deref());
            ctx.emits.push(DhcpV6LeaseEvent::LeaseLost {
                ifindex: self.ifindex,
                uuid: self.config_uuid(),
            });
        }
        self.retrans.disarm();
        self.xid = 0;
        ctx.pool.remove_device(self.ifindex);
        self.close();
        self.fsm_start(ctx)
    }

    /// Terminal failure of the device: report and stop.
    pub(crate) fn fsm_fail(
        &mut self,
        ctx: &mut FsmContext,
        error: DhcpError,
    ) -> Result<(), DhcpError> {
        log::error!("{}: DHCPv6 acquisition failed: {error}", self.ifname);
        ctx.emits.push(DhcpV6LeaseEvent::LeaseFailed {
            ifindex: self.ifindex,
            uuid: self.config_uuid(),
            error,
        });
        ctx.pool.remove_device(self.ifindex);
        self.stop(ctx.conf.lease_dir.as_deref());
        self.state = DhcpV6State::Stopped;
        Ok(())
    }

    /// Send one best effort Release for the current lease, then stop.
    pub(crate) fn fsm_release(
        &mut self,
        ctx: &mut FsmContext,
    ) -> Result<(), DhcpError> {
        let uuid = self.config_uuid();
        if self.lease.is_some() && self.config.is_some() {
            // A single Release without waiting for the server Reply; if it
            // does not get out the network is likely unusable anyway.
            self.state = DhcpV6State::Releasing;
            self.regen_xid();
            if let Err(e) = self.transmit(ctx) {
                log::info!(
                    "{}: Best effort Release not sent: {e}",
                    self.ifname
                );
            }
            ctx.emits.push(DhcpV6LeaseEvent::LeaseReleased {
                ifindex: self.ifindex,
                uuid,
            });
        }
        ctx.pool.remove_device(self.ifindex);
        self.stop(ctx.conf.lease_dir.as_deref());
        self.state = DhcpV6State::Stopped;
        Ok(())
    }

    /// Carrier changes. A LINK_UP while Bound after an outage triggers a
    /// Confirm exchange; during Bound a LINK_DOWN only pauses.
    pub(crate) fn fsm_link_event(
        &mut self,
        ctx: &mut FsmContext,
        up: bool,
    ) -> Result<(), DhcpError> {
        if !up {
            log::debug!("{}: Link went down", self.ifname);
            self.link_was_down = true;
            if self.state.is_retransmitting() {
                // Pause the exchange, a later LINK_UP restarts it. While
                // Selecting the FSM timer carries the initial delay, the
                // collection deadline and the resends, so it must pause
                // too; elsewhere it carries the MRD bound and stays armed.
                ctx.pool
                    .del_timer(self.event(DhcpV6EventKind::Retransmit))?;
                if self.state == DhcpV6State::Selecting {
                    ctx.pool.del_timer(
                        self.event(DhcpV6EventKind::FsmTimeout),
                    )?;
                }
            }
            return Ok(());
        }

        log::debug!("{}: Link came up", self.ifname);
        if !self.link_was_down {
            return Ok(());
        }
        self.link_was_down = false;
        match self.state {
            DhcpV6State::Bound => {
                log::info!(
                    "{}: Link re-appeared, confirming lease",
                    self.ifname
                );
                self.state = DhcpV6State::Confirming;
                self.retrans.set_params(CNF_PARAMS);
                self.regen_xid();
                self.transmit_init(ctx)
            }
            state if state.is_retransmitting() => {
                log::info!(
                    "{}: Link re-appeared, restarting acquisition",
                    self.ifname
                );
                self.fsm_restart(ctx, false)
            }
            _ => Ok(()),
        }
    }

    /// Kernel address event. May record the link-local address and unblock
    /// WaitReady, or abort when the link-local address disappears, or
    /// trigger Decline when a leased address fails duplicate detection.
    pub(crate) fn fsm_address_event(
        &mut self,
        ctx: &mut FsmContext,
        addr: Ipv6Addr,
        deleted: bool,
        tentative: bool,
        duplicate: bool,
    ) -> Result<(), DhcpError> {
        if deleted {
            if self.lladdr == Some(addr) {
                log::debug!(
                    "{}: Link-local address {addr} removed",
                    self.ifname
                );
                self.lladdr = None;
                if self.state.is_retransmitting() {
                    return self.fsm_fail(
                        ctx,
                        DhcpError::new(
                            ErrorKind::NoLinkLocal,
                            format!(
                                "{}: Link-local IPv6 address {addr} was \
                                 removed during acquisition",
                                self.ifname
                            ),
                        ),
                    );
                }
            }
            return Ok(());
        }

        if self.lladdr.is_none()
            && !tentative
            && !duplicate
            && is_ipv6_unicast_link_local(&addr)
        {
            log::debug!(
                "{}: Recording link-local address {addr}",
                self.ifname
            );
            self.lladdr = Some(addr);
        }

        match self.state {
            DhcpV6State::WaitReady => {
                if self.lladdr.is_some() {
                    self.fail_on_timeout = false;
                    ctx.pool
                        .del_timer(self.event(DhcpV6EventKind::FsmTimeout))?;
                    self.fsm_start(ctx)
                } else {
                    Ok(())
                }
            }
            DhcpV6State::Bound => {
                let leased = self
                    .lease
                    .as_ref()
                    .map(|lease| {
                        lease.addresses().any(|a| a.address == addr)
                    })
                    .unwrap_or(false);
                if duplicate && leased {
                    log::info!(
                        "{}: Leased address {addr} failed duplicate \
                         address detection, declining",
                        self.ifname
                    );
                    self.state = DhcpV6State::Declining;
                    self.retrans.set_params(DEC_PARAMS);
                    self.regen_xid();
                    self.transmit_init(ctx)
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

fn lease_ia_options(lease: &DhcpV6Lease) -> Vec<DhcpV6Option> {
    use crate::{
        DhcpV6IaType, DhcpV6OptionIaNa, DhcpV6OptionIaPd, DhcpV6OptionIaTa,
    };
    let mut ret = Vec::new();
    for ia in &lease.ias {
        match ia.ia_type {
            DhcpV6IaType::NonTemporaryAddresses => {
                let mut opt =
                    DhcpV6OptionIaNa::new(ia.iaid, ia.t1_sec, ia.t2_sec);
                opt.addresses = ia.addresses.clone();
                ret.push(DhcpV6Option::IANA(opt));
            }
            DhcpV6IaType::TemporaryAddresses => {
                let mut opt = DhcpV6OptionIaTa::new(ia.iaid);
                opt.addresses = ia.addresses.clone();
                ret.push(DhcpV6Option::IATA(opt));
            }
            DhcpV6IaType::PrefixDelegation => {
                let mut opt =
                    DhcpV6OptionIaPd::new(ia.iaid, ia.t1_sec, ia.t2_sec);
                opt.prefixes = ia.prefixes.clone();
                ret.push(DhcpV6Option::IAPD(opt));
            }
        }
    }
    ret
}
