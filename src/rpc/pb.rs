tonic::include_proto!("gavelpb");
