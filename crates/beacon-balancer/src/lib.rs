#![deny(unsafe_code)]
#![doc = "beacon-balancer: 成员镜像、加权选路与客户端通道生命周期。"]
#![doc = ""]
#![doc = "镜像订阅注册目录的监视流，在会话丢失、瞬时断连与并发解码失败下"]
#![doc = "维持宿主集的一致视图；选路器在每次 RPC 上读取最新快照，过滤隔离"]
#![doc = "宿主后以最低负载优先、等负载轮转的规则选出子通道；通道把三者装配"]
#![doc = "为一个句柄并负责停机顺序。"]

mod channel;
mod mirror;
mod picker;
mod subchannel;

pub use channel::{Channel, ChannelSettings, LbPolicy};
pub use mirror::{MembershipMirror, MembershipSnapshot};
pub use picker::WeightedPicker;
