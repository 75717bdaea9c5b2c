//! Flannel CNI configuration documents

/// Placeholder replaced with the node's IPv4 address at install time
pub const IPV4_ADDRESS_PLACEHOLDER: &str = "%IPV4_ADDRESS%";

/// Linux bridge network chained with portmap
pub const LINUX_V0_3_1: &str = r#"{
  "name":"cbr0",
  "cniVersion":"0.3.1",
  "plugins":[
    {
      "type":"flannel",
      "delegate":{
        "hairpinMode":true,
        "forceAddress":true,
        "isDefaultGateway":true
      }
    },
    {
      "type":"portmap",
      "capabilities":{
        "portMappings":true
      }
    }
  ]
}
"#;

/// Windows overlay network, HNS v1 endpoint policies
pub const WINDOWS_V0_3_1: &str = r#"{
  "name":"flannel.4096",
  "cniVersion":"0.3.1",
  "plugins":[
    {
      "type":"flannel",
      "capabilities": {
        "dns": true
      },
      "delegate": {
        "type": "win-overlay",
        "Policies": [{
            "Name": "EndpointPolicy",
            "Value": {
                "Type": "OutBoundNAT",
                "ExceptionList": ["10.42.0.0/16", "10.43.0.0/16"]
            }
        }, {
            "Name": "EndpointPolicy",
            "Value": {
                "Type": "ROUTE",
                "DestinationPrefix": "10.43.0.0/16",
                "NeedEncap": true
            }
        }]
      }
    }
  ]
}
"#;

/// Windows overlay network for CNI 1.0.0 with the HNS v1 policy layout
pub const WINDOWS_V1_0_0: &str = r#"{
  "name":"flannel.4096",
  "cniVersion":"1.0.0",
  "plugins":[
    {
      "type":"flannel",
      "capabilities": {
        "dns": true
      },
      "delegate": {
        "type": "win-overlay",
        "Policies": [{
            "Name": "EndpointPolicy",
            "Value": {
                "Type": "OutBoundNAT",
                "ExceptionList": ["10.42.0.0/16", "10.43.0.0/16"]
            }
        }, {
            "Name": "EndpointPolicy",
            "Value": {
                "Type": "ROUTE",
                "DestinationPrefix": "10.43.0.0/16",
                "NeedEncap": true
            }
        }]
      }
    }
  ]
}
"#;

/// Windows overlay network for CNI 1.0.0 using HNS v2 policies, port
/// mappings, and a provider address bound to the node
pub const WINDOWS_V1_0_0_EXTENDED: &str = r#"{
  "name":"flannel.4096",
  "cniVersion":"1.0.0",
  "plugins":[
    {
      "type":"flannel",
      "capabilities": {
        "portMappings": true,
        "dns": true
      },
      "delegate": {
        "type": "win-overlay",
        "apiVersion": 2,
        "Policies": [{
            "Name": "OutBoundNAT",
            "Value": {
                "Exceptions": ["10.42.0.0/16", "10.43.0.0/16"]
            }
        }, {
            "Name": "SDNRoute",
            "Value": {
                "DestinationPrefix": "10.43.0.0/16",
                "NeedEncap": true
            }
        }, {
            "Name": "ProviderAddress",
            "Value": {
                "ProviderAddress": "%IPV4_ADDRESS%"
            }
        }]
      }
    }
  ]
}
"#;
