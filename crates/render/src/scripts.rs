//! Shell scripts run inside the central database pods.
//!
//! The eviction scripts look up a raft member by address in `cluster/status`
//! output and kick it; both are safe to re-run because the lookup comes up
//! empty once the member is gone. The chassis script deletes the southbound
//! chassis record by hostname.

/// Script evicting a node from the northbound database raft cluster.
pub fn northbound_eviction_script(node_address: &str) -> String {
    format!(
        r#"export nbstatus=$(ovs-appctl -t /var/run/ovn/ovnnb_db.ctl cluster/status OVN_Northbound)
echo "current northbound status"
echo "$nbstatus"
echo "searching for node {node_address}"
nodeID=$(ovs-appctl -t /var/run/ovn/ovnnb_db.ctl cluster/status OVN_Northbound | grep '{node_address}' | awk '{{print $1}}')
if [ -n "$nodeID" ]
then
  echo "removing node with id $nodeID"
  ovs-appctl -t /var/run/ovn/ovnnb_db.ctl cluster/kick OVN_Northbound $nodeID
  echo "removed node id $nodeID with address {node_address}"
  echo "current northbound status"
  ovs-appctl -t /var/run/ovn/ovnnb_db.ctl cluster/status OVN_Northbound
fi"#
    )
}

/// Script evicting a node from the southbound database raft cluster.
pub fn southbound_eviction_script(node_address: &str) -> String {
    format!(
        r#"export sbstatus=$(ovs-appctl -t /var/run/ovn/ovnsb_db.ctl cluster/status OVN_Southbound)
echo "current southbound status"
echo "$sbstatus"
nodeID=$(ovs-appctl -t /var/run/ovn/ovnsb_db.ctl cluster/status OVN_Southbound | grep '{node_address}' | awk '{{print $1}}')
if [ -n "$nodeID" ]
then
  ovs-appctl -t /var/run/ovn/ovnsb_db.ctl cluster/kick OVN_Southbound $nodeID
  echo "removed node id $nodeID with address {node_address}"
  echo "current southbound status"
  ovs-appctl -t /var/run/ovn/ovnsb_db.ctl cluster/status OVN_Southbound
fi"#
    )
}

/// Script deleting the southbound chassis record for a node, keyed by
/// hostname so address reuse cannot delete the wrong chassis.
pub fn chassis_cleanup_script(hostname: &str) -> String {
    format!(
        r#"chassis=$(ovn-sbctl --columns=name find chassis hostname={hostname} | awk -F ":" '{{print $2}}' | tr -d '"')
if [ -n "$chassis" ]
then
  ovn-sbctl chassis-del $chassis
fi
ovn-sbctl show"#
    )
}

/// Probe verifying the northbound database answers on its leader.
pub const NB_HEALTH_PROBE: &str =
    "ovs-appctl -t /var/run/ovn/ovnnb_db.ctl cluster/status OVN_Northbound";

/// Probe verifying the southbound database answers on its leader.
pub const SB_HEALTH_PROBE: &str =
    "ovs-appctl -t /var/run/ovn/ovnsb_db.ctl cluster/status OVN_Southbound";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_scripts_embed_the_address() {
        let nb = northbound_eviction_script("10.0.0.4");
        assert!(nb.contains("grep '10.0.0.4'"));
        assert!(nb.contains("cluster/kick OVN_Northbound"));
        // the awk program must survive formatting intact
        assert!(nb.contains("awk '{print $1}'"));

        let sb = southbound_eviction_script("10.0.0.4");
        assert!(sb.contains("cluster/kick OVN_Southbound"));
        assert!(!sb.contains("OVN_Northbound"));
    }

    #[test]
    fn eviction_is_guarded_by_member_lookup() {
        let script = northbound_eviction_script("10.0.0.4");
        let kick = script.find("cluster/kick").unwrap();
        let guard = script.find("if [ -n \"$nodeID\" ]").unwrap();
        assert!(guard < kick);
    }

    #[test]
    fn chassis_cleanup_keys_on_hostname() {
        let script = chassis_cleanup_script("worker-1");
        assert!(script.contains("find chassis hostname=worker-1"));
        assert!(script.contains("chassis-del"));
    }
}
